//! Choosing which cached datasets to remove to get under a size limit

use crate::cache::CacheEntry;

/// Order in which cached datasets are given up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Most recently accessed first
    Mru,
    /// Largest first
    Big,
    /// Smallest first
    Small,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Strategy::Lru),
            "mru" => Ok(Strategy::Mru),
            "big" => Ok(Strategy::Big),
            "small" => Ok(Strategy::Small),
            _ => Err(format!("unknown pruning strategy: '{s}'")),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Lru => "lru",
            Strategy::Mru => "mru",
            Strategy::Big => "big",
            Strategy::Small => "small",
        };
        f.write_str(name)
    }
}

/// Entries to remove, in strategy order, so that what remains totals at most `limit` bytes
///
/// Nothing is selected when the cache already fits.
pub fn plan<'a>(entries: &'a [CacheEntry], limit: u64, strategy: Strategy) -> Vec<&'a CacheEntry> {
    let mut remaining: u64 = entries.iter().map(|entry| entry.size).sum();
    if remaining <= limit {
        return Vec::new();
    }
    let mut ordered: Vec<&CacheEntry> = entries.iter().collect();
    match strategy {
        Strategy::Lru => ordered.sort_by_key(|entry| entry.accessed),
        Strategy::Mru => ordered.sort_by_key(|entry| std::cmp::Reverse(entry.accessed)),
        Strategy::Big => ordered.sort_by_key(|entry| std::cmp::Reverse(entry.size)),
        Strategy::Small => ordered.sort_by_key(|entry| entry.size),
    }
    let mut selected = Vec::new();
    for entry in ordered {
        if remaining <= limit {
            break;
        }
        remaining -= entry.size;
        selected.push(entry);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, accessed: u64, size: u64) -> CacheEntry {
        let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(accessed);
        CacheEntry {
            name: name.to_string(),
            path: std::path::PathBuf::from("/data/Public/G").join(name),
            accessed: time,
            modified: time,
            size,
        }
    }

    fn cache() -> Vec<CacheEntry> {
        vec![
            entry("a", 300, 50),
            entry("b", 100, 10),
            entry("c", 200, 40),
        ]
    }

    fn names(selected: Vec<&CacheEntry>) -> Vec<&str> {
        selected.into_iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn fitting_cache_is_left_alone() {
        let entries = cache();
        assert!(plan(&entries, 100, Strategy::Lru).is_empty());
        assert!(plan(&entries, 1000, Strategy::Big).is_empty());
    }

    #[test]
    fn strategies_pick_in_their_order() {
        let entries = cache();
        assert_eq!(names(plan(&entries, 60, Strategy::Lru)), vec!["b", "c"]);
        assert_eq!(names(plan(&entries, 60, Strategy::Mru)), vec!["a"]);
        assert_eq!(names(plan(&entries, 60, Strategy::Big)), vec!["a"]);
        assert_eq!(names(plan(&entries, 60, Strategy::Small)), vec!["b", "c"]);
        assert_eq!(names(plan(&entries, 0, Strategy::Small)), vec!["b", "c", "a"]);
    }

    #[test]
    fn strategy_names() {
        assert_eq!("MRU".parse::<Strategy>(), Ok(Strategy::Mru));
        assert_eq!(Strategy::default().to_string(), "lru");
        assert!("fifo".parse::<Strategy>().is_err());
    }
}
