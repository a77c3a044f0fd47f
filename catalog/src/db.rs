use common::Interaction;
use remote::{Launcher, Session, SessionConfig, Transfer};
use tracing::instrument;

use crate::cache::{CacheEntry, CacheIndex};
use crate::error::Error;
use crate::manifest::{DatasetRecord, Filter, Manifest, pattern};
use crate::prune::Strategy;
use crate::search::{DEFAULT_CONTEXT, SearchHit};

/// Directory under the local root holding the manifest
pub const MANIFEST_DIR: &str = "MSIResearch";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const ALREADY_CACHED: &str = "dataset is already cached; use --force to re-sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Transfer again even if the dataset is cached
    pub force: bool,
    /// Confirm before transferring
    pub ask: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    AlreadyCached,
    Declined,
}

/// The manifest, the local cache and the way to fill the cache from the dataset host
///
/// Both indexes are loaded on first use and dropped by [`Catalog::close`].
#[derive(Debug)]
pub struct Catalog {
    settings: common::Settings,
    manifest: Option<Manifest>,
    cache: Option<CacheIndex>,
}

impl Catalog {
    /// Check that the local root is a directory holding `MSIResearch/`
    pub fn new(settings: common::Settings) -> Result<Self, Error> {
        let root = &settings.dbpath;
        if !root.is_dir() {
            return Err(Error::MissingPath(root.clone()));
        }
        if !root.join(MANIFEST_DIR).is_dir() {
            return Err(Error::InvalidRoot(root.clone()));
        }
        Ok(Self {
            settings,
            manifest: None,
            cache: None,
        })
    }

    pub fn settings(&self) -> &common::Settings {
        &self.settings
    }

    /// Connection settings may be overridden per command
    pub fn settings_mut(&mut self) -> &mut common::Settings {
        &mut self.settings
    }

    pub fn root(&self) -> &std::path::Path {
        &self.settings.dbpath
    }

    pub fn manifest_path(&self) -> std::path::PathBuf {
        self.root().join(MANIFEST_DIR).join(MANIFEST_FILE)
    }

    /// Load both indexes now instead of on first use
    pub async fn open(&mut self) -> Result<(), Error> {
        self.manifest = Some(Manifest::load(&self.manifest_path()).await?);
        self.cache = Some(CacheIndex::rescan(self.root()).await?);
        Ok(())
    }

    pub fn close(&mut self) {
        self.manifest = None;
        self.cache = None;
    }

    pub fn is_open(&self) -> bool {
        self.manifest.is_some() || self.cache.is_some()
    }

    pub async fn manifest(&mut self) -> Result<&Manifest, Error> {
        let manifest = match self.manifest.take() {
            Some(manifest) => manifest,
            None => Manifest::load(&self.manifest_path()).await?,
        };
        Ok(self.manifest.insert(manifest))
    }

    pub async fn cache(&mut self) -> Result<&CacheIndex, Error> {
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => CacheIndex::rescan(self.root()).await?,
        };
        Ok(self.cache.insert(cache))
    }

    /// Scan the local root again, replacing the cache index
    pub async fn rescan(&mut self) -> Result<&CacheIndex, Error> {
        let cache = CacheIndex::rescan(self.root()).await?;
        Ok(self.cache.insert(cache))
    }

    async fn indexes(&mut self) -> Result<(&Manifest, &CacheIndex), Error> {
        let manifest = match self.manifest.take() {
            Some(manifest) => manifest,
            None => Manifest::load(&self.manifest_path()).await?,
        };
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => match CacheIndex::rescan(self.root()).await {
                Ok(cache) => cache,
                Err(error) => {
                    self.manifest = Some(manifest);
                    return Err(error);
                }
            },
        };
        Ok((self.manifest.insert(manifest), self.cache.insert(cache)))
    }

    pub async fn list(&mut self, filter: &Filter) -> Result<Vec<&DatasetRecord>, Error> {
        Ok(self.manifest().await?.query(filter))
    }

    pub async fn list_cached(&mut self, filter: &Filter) -> Result<Vec<&CacheEntry>, Error> {
        let (manifest, cache) = self.indexes().await?;
        Ok(cache.list(manifest, filter))
    }

    pub async fn search(
        &mut self,
        search_pattern: &str,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>, Error> {
        let regex = pattern(search_pattern)?;
        Ok(self.manifest().await?.search(&regex, filter, DEFAULT_CONTEXT))
    }

    /// Like [`Catalog::search`] but limited to cached datasets
    pub async fn search_cached(
        &mut self,
        search_pattern: &str,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>, Error> {
        let regex = pattern(search_pattern)?;
        let (manifest, cache) = self.indexes().await?;
        Ok(manifest
            .search(&regex, filter, DEFAULT_CONTEXT)
            .into_iter()
            .filter(|hit| cache.contains(&hit.name))
            .collect())
    }

    pub async fn describe(&mut self, name: &str) -> Result<&DatasetRecord, Error> {
        self.manifest()
            .await?
            .lookup(name)
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))
    }

    pub async fn cached(&mut self, name: &str) -> Result<Option<&CacheEntry>, Error> {
        Ok(self.cache().await?.lookup(name))
    }

    /// Mirror dataset `name` from the dataset host into the local root
    ///
    /// A fresh session is opened for the transfer and always closed before returning. The
    /// cache index is rebuilt after a transfer that left the dataset directory in place.
    #[instrument(skip(self, launcher, interaction))]
    pub async fn sync<L: Launcher>(
        &mut self,
        name: &str,
        options: SyncOptions,
        launcher: &L,
        interaction: &dyn Interaction,
    ) -> Result<SyncOutcome, Error> {
        let (manifest, cache) = self.indexes().await?;
        let record = manifest
            .lookup(name)
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))?;
        if cache.contains(name) && !options.force {
            interaction.report(ALREADY_CACHED);
            return Ok(SyncOutcome::AlreadyCached);
        }
        let (scope, group) = (record.scope.clone(), record.group.clone());
        let (Some(remote_host), Some(remote_path)) =
            (&self.settings.remote_host, &self.settings.remote_path)
        else {
            return Err(Error::RemoteNotConfigured);
        };
        let source = format!(
            "{}/{scope}/{group}/{name}/",
            remote_path.trim_end_matches('/')
        );
        let parent = self.root().join(&scope).join(&group);
        let destination = parent.join(name);
        if !options.dry_run {
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(Error::io(&parent))?;
        }
        let config = SessionConfig::from_settings(&self.settings, remote_host);
        let mut session = Session::new(config, launcher, interaction);
        let result = session
            .download(
                &source,
                &format!("{}/", destination.display()),
                options.dry_run,
                options.ask,
            )
            .await;
        session.close().await;
        let transfer = result.map_err(|source| match source {
            remote::Error::Prompt(error) => Error::Prompt(error),
            source => Error::Transfer {
                name: name.to_string(),
                source,
            },
        })?;
        if transfer == Transfer::Declined {
            return Ok(SyncOutcome::Declined);
        }
        let exists = tokio::fs::try_exists(&destination)
            .await
            .map_err(Error::io(&destination))?;
        if exists {
            self.rescan().await?;
        }
        tracing::info!("synced '{}'", name);
        Ok(SyncOutcome::Synced)
    }

    /// Remove cached datasets until the cache totals at most `limit` bytes
    ///
    /// Returns the removed entries, or the ones that would be removed in a dry run. Nothing is
    /// removed when the confirmation is declined.
    #[instrument(skip(self, interaction))]
    pub async fn prune(
        &mut self,
        limit: u64,
        strategy: Strategy,
        dry_run: bool,
        ask: bool,
        interaction: &dyn Interaction,
    ) -> Result<Vec<CacheEntry>, Error> {
        let cache = self.cache().await?;
        let selected: Vec<CacheEntry> = cache
            .plan_prune(limit, strategy)
            .into_iter()
            .cloned()
            .collect();
        if selected.is_empty() {
            interaction.report(&format!(
                "cache size {} is within the limit of {}",
                common::format_size(cache.total_size()),
                common::format_size(limit)
            ));
            return Ok(selected);
        }
        for entry in &selected {
            interaction.report(&format!(
                "dataset will be removed: '{}' ({})",
                entry.path.display(),
                common::format_size(entry.size)
            ));
        }
        if dry_run {
            return Ok(selected);
        }
        if ask
            && !interaction
                .confirm(common::interact::CONTINUE_PROMPT)
                .map_err(Error::Prompt)?
        {
            return Ok(Vec::new());
        }
        for entry in &selected {
            tokio::fs::remove_dir_all(&entry.path)
                .await
                .map_err(Error::io(&entry.path))?;
            tracing::info!("removed {:?}", entry.path);
        }
        self.rescan().await?;
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::write_dataset;
    use crate::manifest::tests::sample_manifest;
    use crate::search::{Field, Snippet};
    use remote::Invocation;
    use remote::testutils::{RecordingLauncher, Scripted};

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: std::path::PathBuf,
        settings: common::Settings,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::create_dir_all(root.join(MANIFEST_DIR)).unwrap();
        std::fs::write(root.join(MANIFEST_DIR).join(MANIFEST_FILE), sample_manifest()).unwrap();
        let mut settings = common::Settings::resolve("Magi-01", |_| None).unwrap();
        settings.dbpath = root.clone();
        settings.username = "viteklab".to_string();
        settings.remote_host = Some("Magi-03.local".to_string());
        settings.remote_path = Some("/Volumes/Datasets/".to_string());
        Fixture {
            _tmp: tmp,
            root,
            settings,
        }
    }

    /// Launcher that writes the dataset files the way rsync would
    fn rsync_writing(root: &std::path::Path) -> RecordingLauncher {
        let root = root.to_path_buf();
        RecordingLauncher::default().with_effect(move |invocation| {
            if invocation.args.iter().any(|arg| arg == "--dry-run") {
                return;
            }
            if let Some(destination) = invocation.args.last() {
                let destination = std::path::Path::new(destination);
                assert!(destination.starts_with(&root));
                std::fs::create_dir_all(destination).unwrap();
                std::fs::write(destination.join("data.ibd"), [0u8; 64]).unwrap();
            }
        })
    }

    #[test]
    fn root_must_hold_manifest_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = common::Settings::resolve("Magi-01", |_| None).unwrap();
        settings.dbpath = tmp.path().join("missing");
        assert!(matches!(
            Catalog::new(settings.clone()),
            Err(Error::MissingPath(_))
        ));
        settings.dbpath = tmp.path().to_path_buf();
        assert!(matches!(Catalog::new(settings), Err(Error::InvalidRoot(_))));
    }

    #[tokio::test]
    async fn indexes_load_lazily_and_close() {
        let fixture = fixture();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        assert!(!catalog.is_open());
        assert_eq!(catalog.list(&Filter::any()).await.unwrap().len(), 4);
        assert!(catalog.is_open());
        catalog.close();
        assert!(!catalog.is_open());
        catalog.open().await.unwrap();
        assert!(catalog.cache().await.unwrap().is_empty());
        assert!(catalog.cached("PXD001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_finds_description_snippet() {
        let fixture = fixture();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let hits = catalog.search("cancer", &Filter::any()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "PXD001");
        match hits[0].snippet(Field::Description) {
            Some(Snippet::Text(text)) => assert!(text.contains("cancer")),
            other => panic!("unexpected description snippet: {other:?}"),
        }
        assert!(catalog.search("(", &Filter::any()).await.is_err());
    }

    #[tokio::test]
    async fn search_cached_only_reports_cached_datasets() {
        let fixture = fixture();
        write_dataset(&fixture.root, "Public/MassIVE/PXD002", &[("a", 1)]);
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let hits = catalog.search_cached("maldi", &Filter::any()).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|hit| hit.name.as_str()).collect();
        assert_eq!(names, vec!["PXD002"]);
        let cached = catalog.list_cached(&Filter::any()).await.unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn describe_unknown_dataset_is_not_found() {
        let fixture = fixture();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        assert_eq!(catalog.describe("PXD003").await.unwrap().title, "Kidney");
        let error = catalog.describe("PXD999").await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn sync_downloads_into_scope_and_group() {
        let fixture = fixture();
        let launcher = rsync_writing(&fixture.root);
        let ui = Scripted::default();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let outcome = catalog
            .sync("PXD002", SyncOptions::default(), &launcher, &ui)
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        let destination = format!("{}/", fixture.root.join("Public/MassIVE/PXD002").display());
        assert_eq!(
            launcher.ran(),
            vec![Invocation::new("rsync").args([
                "-aP",
                "viteklab@Magi-03.local:/Volumes/Datasets/Public/MassIVE/PXD002/",
                destination.as_str(),
            ])]
        );
        assert!(launcher.spawned().is_empty());
        let entry = catalog.cached("PXD002").await.unwrap().unwrap();
        assert_eq!(entry.size, 64);
    }

    #[tokio::test]
    async fn second_sync_is_already_cached() {
        let fixture = fixture();
        let launcher = rsync_writing(&fixture.root);
        let ui = Scripted::default();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        for _ in 0..2 {
            catalog
                .sync("PXD002", SyncOptions::default(), &launcher, &ui)
                .await
                .unwrap();
        }
        assert_eq!(launcher.ran().len(), 1);
        assert_eq!(ui.reports().last().map(String::as_str), Some(ALREADY_CACHED));

        let forced = SyncOptions {
            force: true,
            ..SyncOptions::default()
        };
        let outcome = catalog.sync("PXD002", forced, &launcher, &ui).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(launcher.ran().len(), 2);
    }

    #[tokio::test]
    async fn cached_dataset_is_not_transferred() {
        let fixture = fixture();
        write_dataset(&fixture.root, "Protected/PRIDE/PXD003", &[("a.ibd", 8)]);
        let launcher = RecordingLauncher::default();
        let ui = Scripted::default();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let outcome = catalog
            .sync("PXD003", SyncOptions::default(), &launcher, &ui)
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::AlreadyCached);
        assert!(launcher.ran().is_empty());
        assert_eq!(ui.reports(), vec![ALREADY_CACHED.to_string()]);
    }

    #[tokio::test]
    async fn unknown_dataset_has_no_side_effects() {
        let fixture = fixture();
        let launcher = RecordingLauncher::default();
        let ui = Scripted::default();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let error = catalog
            .sync("PXD999", SyncOptions::default(), &launcher, &ui)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::UnknownDataset(_)));
        assert!(launcher.ran().is_empty());
        assert!(launcher.spawned().is_empty());
        assert!(ui.reports().is_empty());
        let entries: Vec<_> = std::fs::read_dir(&fixture.root).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn sync_needs_remote_settings() {
        let mut fixture = fixture();
        fixture.settings.remote_path = None;
        let launcher = RecordingLauncher::default();
        let ui = Scripted::default();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let error = catalog
            .sync("PXD001", SyncOptions::default(), &launcher, &ui)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::RemoteNotConfigured));
        assert!(launcher.ran().is_empty());
    }

    #[tokio::test]
    async fn failed_transfer_closes_tunnel() {
        let mut fixture = fixture();
        fixture.settings.server = Some("login.example.edu".to_string());
        fixture.settings.server_username = Some("me".to_string());
        fixture.settings.tunnel_grace = std::time::Duration::ZERO;
        let launcher = RecordingLauncher::default().with_exit_code(23);
        let ui = Scripted::default();
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let error = catalog
            .sync("PXD001", SyncOptions::default(), &launcher, &ui)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::Transfer {
                source: remote::Error::Failed { .. },
                ..
            }
        ));
        assert_eq!(launcher.spawned().len(), 1);
        assert_eq!(launcher.terminated(), 1);
        assert!(catalog.cached("PXD001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn declined_and_dry_run_syncs_leave_cache_alone() {
        let fixture = fixture();
        let launcher = rsync_writing(&fixture.root);
        let ui = Scripted::default().with_answers([false]);
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();
        let ask = SyncOptions {
            ask: true,
            ..SyncOptions::default()
        };
        let outcome = catalog.sync("PXD001", ask, &launcher, &ui).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Declined);
        assert!(launcher.ran().is_empty());

        let dry_run = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };
        catalog.sync("PXD001", dry_run, &launcher, &ui).await.unwrap();
        assert_eq!(launcher.ran().len(), 1);
        assert!(catalog.cached("PXD001").await.unwrap().is_none());
        assert!(!fixture.root.join("Public/PRIDE/PXD001").exists());
    }

    #[tokio::test]
    async fn prune_removes_least_recently_used() {
        let fixture = fixture();
        write_dataset(&fixture.root, "Public/PRIDE/PXD001", &[("a", 600)]);
        write_dataset(&fixture.root, "Public/MassIVE/PXD002", &[("a", 300)]);
        write_dataset(&fixture.root, "Protected/PRIDE/PXD003", &[("a", 200)]);
        let times = [
            ("Public/PRIDE/PXD001", 300),
            ("Public/MassIVE/PXD002", 100),
            ("Protected/PRIDE/PXD003", 200),
        ];
        for (path, secs) in times {
            let time = filetime::FileTime::from_unix_time(1_600_000_000 + secs, 0);
            filetime::set_file_times(fixture.root.join(path), time, time).unwrap();
        }
        let ui = Scripted::default().with_answers([false, true]);
        let mut catalog = Catalog::new(fixture.settings.clone()).unwrap();

        let planned = catalog
            .prune(700, Strategy::Lru, true, false, &ui)
            .await
            .unwrap();
        let names: Vec<&str> = planned.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["PXD002", "PXD003"]);
        assert_eq!(catalog.cache().await.unwrap().len(), 3);

        let declined = catalog
            .prune(700, Strategy::Lru, false, true, &ui)
            .await
            .unwrap();
        assert!(declined.is_empty());
        assert!(fixture.root.join("Public/MassIVE/PXD002").exists());

        let removed = catalog
            .prune(700, Strategy::Lru, false, true, &ui)
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!fixture.root.join("Public/MassIVE/PXD002").exists());
        assert!(!fixture.root.join("Protected/PRIDE/PXD003").exists());
        let cache = catalog.cache().await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_size(), 600);
    }
}
