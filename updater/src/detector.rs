//! Installed versus published build comparison
//!
//! The installed build comes from Steam's app manifest next to the server
//! files. It is only re-parsed when the file's modification time moves. The
//! published build comes from `steamcmd +app_info_print`, queried for the
//! branch the installation follows.

use crate::error::SourceError;
use crate::state::EngineState;
use async_trait::async_trait;
use log::{debug, info, warn};
use shared::vdf;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Command;

/// Branch Steam reports when a manifest carries no beta key
pub const DEFAULT_BRANCH: &str = "public";

/// Latest published build for an app and branch
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn build_id(&self, app_id: &str, branch: &str) -> Result<String, SourceError>;

    /// Switches to another steamcmd executable after a config reload
    fn retarget(&mut self, _program: &Path) {}
}

/// What the installation says about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescriptor {
    pub build_id: Option<String>,
    pub branch: Option<String>,
}

/// Access to the on-disk install descriptor
#[async_trait]
pub trait LocalSource: Send + Sync {
    async fn modified(&self, path: &Path) -> Result<SystemTime, SourceError>;
    async fn read(&self, path: &Path) -> Result<LocalDescriptor, SourceError>;
}

/// Extracts build id and branch from an `appmanifest_*.acf` document
pub fn parse_app_manifest(text: &str) -> Result<LocalDescriptor, SourceError> {
    let document = vdf::parse(text).map_err(|source| SourceError::Vdf {
        context: "app manifest".to_string(),
        source,
    })?;
    let app_state = document
        .section("AppState")
        .ok_or_else(|| SourceError::Missing("AppState section".to_string()))?;

    let branch = app_state
        .lookup_str(&["UserConfig", "betakey"])
        .filter(|key| !key.is_empty())
        .unwrap_or(DEFAULT_BRANCH);

    Ok(LocalDescriptor {
        build_id: app_state.get_str("buildid").map(str::to_string),
        branch: Some(branch.to_string()),
    })
}

/// Pulls `depots/branches/<branch>/buildid` out of `app_info_print` output
pub fn parse_app_info(text: &str, app_id: &str, branch: &str) -> Result<String, SourceError> {
    let info = vdf::parse_from_key(text, app_id).map_err(|source| SourceError::Vdf {
        context: format!("app info for {}", app_id),
        source,
    })?;

    info.lookup_str(&[app_id, "depots", "branches", branch, "buildid"])
        .map(str::to_string)
        .ok_or_else(|| SourceError::Missing(format!("build id for branch {}", branch)))
}

#[derive(Debug, Default, Clone)]
pub struct AppManifestSource;

impl AppManifestSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LocalSource for AppManifestSource {
    async fn modified(&self, path: &Path) -> Result<SystemTime, SourceError> {
        tokio::fs::metadata(path)
            .await
            .and_then(|metadata| metadata.modified())
            .map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn read(&self, path: &Path) -> Result<LocalDescriptor, SourceError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        parse_app_manifest(&text)
    }
}

/// Asks steamcmd for fresh app info on every call
#[derive(Debug, Clone)]
pub struct SteamCmdSource {
    program: PathBuf,
}

impl SteamCmdSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// steamcmd answers from this cache when it exists, even if it is stale
    fn app_info_cache(&self) -> PathBuf {
        self.program
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("appcache")
            .join("appinfo.vdf")
    }
}

#[async_trait]
impl BuildSource for SteamCmdSource {
    fn retarget(&mut self, program: &Path) {
        self.program = program.to_path_buf();
    }

    async fn build_id(&self, app_id: &str, branch: &str) -> Result<String, SourceError> {
        let cache = self.app_info_cache();
        if let Err(e) = tokio::fs::remove_file(&cache).await {
            debug!("Could not remove {}: {}", cache.display(), e);
        }

        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .args([
                "+login",
                "anonymous",
                "+app_info_update",
                "1",
                "+app_info_print",
                app_id,
                "+logoff",
                "+quit",
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                program: program.clone(),
                source,
            })?;

        // steamcmd exits non-zero on some successful runs, so trust the output first
        let text = String::from_utf8_lossy(&output.stdout);
        match parse_app_info(&text, app_id, branch) {
            Ok(build_id) => Ok(build_id),
            Err(_) if !output.status.success() => Err(SourceError::Failed {
                program,
                status: output.status.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

pub struct UpdateDetector {
    local: Box<dyn LocalSource>,
    remote: Box<dyn BuildSource>,
}

impl UpdateDetector {
    pub fn new(local: Box<dyn LocalSource>, remote: Box<dyn BuildSource>) -> Self {
        Self { local, remote }
    }

    pub fn retarget_remote(&mut self, program: &Path) {
        info!("Build lookups now use {}", program.display());
        self.remote.retarget(program);
    }

    /// Re-reads the descriptor if it changed since the last read
    ///
    /// Returns true when new values were loaded.
    pub async fn refresh_local(&self, manifest: &Path, state: &mut EngineState) -> bool {
        let modified = match self.local.modified(manifest).await {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Cannot stat install descriptor: {}", e);
                return false;
            }
        };

        if state.descriptor_modified == Some(modified) {
            return false;
        }

        match self.local.read(manifest).await {
            Ok(descriptor) => {
                if descriptor.build_id != state.local_build {
                    info!(
                        "Installed build is {} on branch {}",
                        descriptor.build_id.as_deref().unwrap_or("unknown"),
                        descriptor.branch.as_deref().unwrap_or("unknown")
                    );
                }
                state.local_build = descriptor.build_id;
                state.local_branch = descriptor.branch;
                state.descriptor_modified = Some(modified);
                true
            }
            Err(e) => {
                warn!("Cannot read install descriptor: {}", e);
                false
            }
        }
    }

    /// Queries the published build for the installed branch
    ///
    /// Without a known branch nothing is queried. On error the previous value
    /// stays.
    pub async fn refresh_remote(&self, app_id: &str, state: &mut EngineState) {
        let Some(branch) = state.local_branch.clone() else {
            debug!("Installed branch unknown, skipping build check");
            return;
        };

        match self.remote.build_id(app_id, &branch).await {
            Ok(build_id) => {
                if state.remote_build.as_ref() != Some(&build_id) {
                    info!("Latest build on {} is {}", branch, build_id);
                }
                state.remote_build = Some(build_id);
            }
            Err(e) => warn!("Build check for {} failed: {}", branch, e),
        }
    }

    /// Refreshes both sides and reports whether they differ
    pub async fn detect(&self, manifest: &Path, app_id: &str, state: &mut EngineState) -> bool {
        self.refresh_local(manifest, state).await;
        self.refresh_remote(app_id, state).await;
        state.update_available()
    }

    /// Forces the next refresh to re-read the descriptor
    pub fn invalidate(&self, state: &mut EngineState) {
        state.descriptor_modified = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const MANIFEST: &str = r#""AppState"
{
	"appid"		"258550"
	"Universe"		"1"
	"name"		"Rust Dedicated Server"
	"StateFlags"		"4"
	"installdir"		"rust_dedicated"
	"buildid"		"14126523"
	"UserConfig"
	{
	}
	"MountedConfig"
	{
	}
}
"#;

    const APP_INFO: &str = r#"Redirecting stderr to 'logs/stderr.txt'
Logging in user 'anonymous' to Steam Public...OK
AppID : 258550, change number : 24330161/0, last change : Fri Oct  9 18:04:10 2026
"258550"
{
	"common"
	{
		"name"		"Rust Dedicated Server"
		"type"		"Tool"
	}
	"depots"
	{
		"258552"
		{
			"manifests"
			{
				"public"		"4852061932584307112"
			}
		}
		"branches"
		{
			"public"
			{
				"buildid"		"14150020"
				"timeupdated"		"1760022250"
			}
			"staging"
			{
				"buildid"		"14151377"
				"description"		"Staging branch"
				"timeupdated"		"1760031107"
			}
		}
	}
}
Unloading Steam API...OK
"#;

    #[test]
    fn test_parse_manifest_defaults_to_public() {
        let descriptor = parse_app_manifest(MANIFEST).unwrap();
        assert_eq!(descriptor.build_id.as_deref(), Some("14126523"));
        assert_eq!(descriptor.branch.as_deref(), Some("public"));
    }

    #[test]
    fn test_parse_manifest_with_beta_key() {
        let text = MANIFEST.replace(
            "\"UserConfig\"\n\t{\n\t}",
            "\"UserConfig\"\n\t{\n\t\t\"betakey\"\t\t\"staging\"\n\t}",
        );
        let descriptor = parse_app_manifest(&text).unwrap();
        assert_eq!(descriptor.branch.as_deref(), Some("staging"));
    }

    #[test]
    fn test_parse_manifest_without_app_state() {
        let err = parse_app_manifest("\"Other\" { }").unwrap_err();
        assert!(matches!(err, SourceError::Missing(_)));
    }

    #[test]
    fn test_parse_app_info_branches() {
        assert_eq!(
            parse_app_info(APP_INFO, "258550", "public").unwrap(),
            "14150020"
        );
        assert_eq!(
            parse_app_info(APP_INFO, "258550", "staging").unwrap(),
            "14151377"
        );
    }

    #[test]
    fn test_parse_app_info_unknown_branch() {
        let err = parse_app_info(APP_INFO, "258550", "aux01").unwrap_err();
        assert!(matches!(err, SourceError::Missing(_)));
    }

    #[test]
    fn test_parse_app_info_without_block() {
        let err = parse_app_info("Login Failure: No Connection", "258550", "public").unwrap_err();
        assert!(matches!(err, SourceError::Vdf { .. }));
    }

    #[test]
    fn test_steamcmd_cache_location() {
        let source = SteamCmdSource::new("/opt/steamcmd/steamcmd.sh");
        assert_eq!(
            source.app_info_cache(),
            PathBuf::from("/opt/steamcmd/appcache/appinfo.vdf")
        );
    }

    #[test]
    fn test_steamcmd_retarget_moves_cache() {
        let mut source = SteamCmdSource::new("/opt/steamcmd/steamcmd.sh");
        source.retarget(Path::new("/srv/steam/steamcmd.sh"));
        assert_eq!(source.program(), Path::new("/srv/steam/steamcmd.sh"));
        assert_eq!(
            source.app_info_cache(),
            PathBuf::from("/srv/steam/appcache/appinfo.vdf")
        );
    }

    #[tokio::test]
    async fn test_app_manifest_source_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("appmanifest_258550.acf");
        std::fs::write(&path, MANIFEST).unwrap();

        let source = AppManifestSource::new();
        assert!(source.modified(&path).await.is_ok());
        let descriptor = source.read(&path).await.unwrap();
        assert_eq!(descriptor.build_id.as_deref(), Some("14126523"));

        let missing = dir.path().join("missing.acf");
        assert!(matches!(
            source.modified(&missing).await,
            Err(SourceError::Io { .. })
        ));
    }

    struct MemoryDescriptor {
        modified: Mutex<SystemTime>,
        descriptor: Mutex<LocalDescriptor>,
        reads: AtomicUsize,
    }

    impl MemoryDescriptor {
        fn new(build: &str) -> Self {
            Self {
                modified: Mutex::new(SystemTime::UNIX_EPOCH),
                descriptor: Mutex::new(LocalDescriptor {
                    build_id: Some(build.to_string()),
                    branch: Some("public".to_string()),
                }),
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LocalSource for std::sync::Arc<MemoryDescriptor> {
        async fn modified(&self, _path: &Path) -> Result<SystemTime, SourceError> {
            Ok(*self.modified.lock().unwrap())
        }

        async fn read(&self, _path: &Path) -> Result<LocalDescriptor, SourceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.descriptor.lock().unwrap().clone())
        }
    }

    struct ScriptedRemote {
        answers: Mutex<Vec<Result<String, SourceError>>>,
        queries: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedRemote {
        fn new(answers: Vec<Result<String, SourceError>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BuildSource for std::sync::Arc<ScriptedRemote> {
        async fn build_id(&self, app_id: &str, branch: &str) -> Result<String, SourceError> {
            self.queries
                .lock()
                .unwrap()
                .push((app_id.to_string(), branch.to_string()));
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                return Err(SourceError::Missing("scripted answer".to_string()));
            }
            answers.remove(0)
        }
    }

    #[tokio::test]
    async fn test_descriptor_read_only_when_modified() {
        let local = std::sync::Arc::new(MemoryDescriptor::new("1000"));
        let remote = std::sync::Arc::new(ScriptedRemote::new(vec![]));
        let detector = UpdateDetector::new(Box::new(local.clone()), Box::new(remote));
        let mut state = EngineState::default();
        let manifest = Path::new("appmanifest.acf");

        assert!(detector.refresh_local(manifest, &mut state).await);
        assert!(!detector.refresh_local(manifest, &mut state).await);
        assert_eq!(local.reads.load(Ordering::SeqCst), 1);

        *local.descriptor.lock().unwrap() = LocalDescriptor {
            build_id: Some("1001".to_string()),
            branch: Some("public".to_string()),
        };
        assert!(!detector.refresh_local(manifest, &mut state).await);
        assert_eq!(state.local_build.as_deref(), Some("1000"));

        *local.modified.lock().unwrap() = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        assert!(detector.refresh_local(manifest, &mut state).await);
        assert_eq!(state.local_build.as_deref(), Some("1001"));
        assert_eq!(local.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reread() {
        let local = std::sync::Arc::new(MemoryDescriptor::new("1000"));
        let remote = std::sync::Arc::new(ScriptedRemote::new(vec![]));
        let detector = UpdateDetector::new(Box::new(local.clone()), Box::new(remote));
        let mut state = EngineState::default();
        let manifest = Path::new("appmanifest.acf");

        detector.refresh_local(manifest, &mut state).await;
        detector.invalidate(&mut state);
        assert!(detector.refresh_local(manifest, &mut state).await);
        assert_eq!(local.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detect_compares_builds() {
        let local = std::sync::Arc::new(MemoryDescriptor::new("1000"));
        let remote = std::sync::Arc::new(ScriptedRemote::new(vec![
            Ok("1000".to_string()),
            Ok("1001".to_string()),
            Err(SourceError::Missing("build id for branch public".to_string())),
        ]));
        let detector = UpdateDetector::new(Box::new(local), Box::new(remote.clone()));
        let mut state = EngineState::default();
        let manifest = Path::new("appmanifest.acf");

        assert!(!detector.detect(manifest, "258550", &mut state).await);
        assert!(detector.detect(manifest, "258550", &mut state).await);

        // A failed query keeps the last known value
        assert!(detector.detect(manifest, "258550", &mut state).await);
        assert_eq!(state.remote_build.as_deref(), Some("1001"));

        let queries = remote.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], ("258550".to_string(), "public".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_branch_skips_remote_query() {
        let local = std::sync::Arc::new(MemoryDescriptor::new("1000"));
        *local.descriptor.lock().unwrap() = LocalDescriptor {
            build_id: Some("1000".to_string()),
            branch: None,
        };
        let remote = std::sync::Arc::new(ScriptedRemote::new(vec![Ok("1001".to_string())]));
        let detector = UpdateDetector::new(Box::new(local), Box::new(remote.clone()));
        let mut state = EngineState::default();

        assert!(
            !detector
                .detect(Path::new("appmanifest.acf"), "258550", &mut state)
                .await
        );
        assert!(remote.queries.lock().unwrap().is_empty());
        assert!(state.remote_build.is_none());
    }
}
