use anyhow::{Context, anyhow};

/// Which local port to use for gateway forwarding
///
/// Accepts "auto" (any free loopback port), a single port ("8080") or ranges
/// ("8000-8099,9000"); for explicit ports the first one that can be bound on loopback wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortChoice {
    Auto,
    Ranges(Vec<std::ops::RangeInclusive<u16>>),
}

impl PortChoice {
    pub fn parse(choice: &str) -> anyhow::Result<Self> {
        let choice = choice.trim();
        if choice.eq_ignore_ascii_case("auto") {
            return Ok(PortChoice::Auto);
        }
        let mut ranges = Vec::new();
        for range_str in choice.split(',') {
            let range_str = range_str.trim();
            if range_str.is_empty() {
                continue;
            }
            if let Some((start_str, end_str)) = range_str.split_once('-') {
                let start: u16 = start_str
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid start port in range: {start_str}"))?;
                let end: u16 = end_str
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid end port in range: {end_str}"))?;
                if start > end {
                    return Err(anyhow!(
                        "Invalid port range: start port {} > end port {}",
                        start,
                        end
                    ));
                }
                if start == 0 {
                    return Err(anyhow!("Port 0 is not allowed in ranges"));
                }
                ranges.push(start..=end);
            } else {
                let port: u16 = range_str
                    .parse()
                    .with_context(|| format!("Invalid port: {range_str}"))?;
                if port == 0 {
                    return Err(anyhow!("Port 0 is not allowed"));
                }
                ranges.push(port..=port);
            }
        }
        if ranges.is_empty() {
            return Err(anyhow!("No valid port ranges found"));
        }
        Ok(PortChoice::Ranges(ranges))
    }

    /// Pick a port that is currently free on loopback
    pub fn pick(&self) -> anyhow::Result<u16> {
        match self {
            PortChoice::Auto => free_loopback_port(),
            PortChoice::Ranges(ranges) => {
                let mut last_error = None;
                for port in ranges.iter().flat_map(|range| range.clone()) {
                    match std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, port)) {
                        Ok(_) => {
                            tracing::debug!("Local port {} is free for forwarding", port);
                            return Ok(port);
                        }
                        Err(e) => {
                            tracing::debug!("Port {} is not available: {}", port, e);
                            last_error = Some(e);
                        }
                    }
                }
                Err(anyhow!(
                    "No free local port for forwarding: {}",
                    last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no ports available".to_string())
                ))
            }
        }
    }
}

/// `preferred` if it is free on loopback, otherwise any free loopback port
pub fn find_forward_port(preferred: u16) -> anyhow::Result<u16> {
    match PortChoice::Ranges(vec![preferred..=preferred]).pick() {
        Ok(port) => Ok(port),
        Err(error) => {
            tracing::info!(
                "Preferred forwarding port {} is taken ({:#}), picking another",
                preferred,
                error
            );
            free_loopback_port()
        }
    }
}

fn free_loopback_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .context("Failed to bind an ephemeral loopback port")?;
    Ok(listener
        .local_addr()
        .context("Failed to read ephemeral port")?
        .port())
}
