use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::archive::{ExtractSummary, extract_zip};
use crate::config::PrepareConfig;
use crate::download::Downloader;

/// Preparation steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    EnsureDestination,
    FetchArchive,
    ExtractArchive,
    RelocateDist,
    RewriteDefinitionUrl,
    FetchDefinition,
    Cleanup,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::EnsureDestination,
        Step::FetchArchive,
        Step::ExtractArchive,
        Step::RelocateDist,
        Step::RewriteDefinitionUrl,
        Step::FetchDefinition,
        Step::Cleanup,
    ];

    fn describe(self) -> &'static str {
        match self {
            Step::EnsureDestination => "cannot create docs path",
            Step::FetchArchive => "cannot download swagger ui zip",
            Step::ExtractArchive => "cannot unzip swagger ui file",
            Step::RelocateDist => "cannot move swagger ui dist to docs",
            Step::RewriteDefinitionUrl => "cannot replace definition url",
            Step::FetchDefinition => "cannot download example definition",
            Step::Cleanup => "cannot remove swagger ui download artifacts",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A failed preparation run: which step broke and why.
///
/// Nothing is rolled back, so every step before `step` has left its
/// effects on disk.
#[derive(Debug, Error)]
#[error("{step}")]
pub struct PrepareError {
    pub step: Step,
    #[source]
    pub source: anyhow::Error,
}

impl PrepareError {
    pub fn completed_steps(&self) -> &'static [Step] {
        let position = Step::ALL
            .iter()
            .position(|step| *step == self.step)
            .unwrap_or(0);
        &Step::ALL[..position]
    }
}

trait AtStep<T> {
    fn at(self, step: Step) -> Result<T, PrepareError>;
}

impl<T, E> AtStep<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn at(self, step: Step) -> Result<T, PrepareError> {
        self.map_err(|err| PrepareError {
            step,
            source: err.into(),
        })
    }
}

/// Runs the whole preparation against `config`, stopping at the first failure.
pub async fn prepare_docs(
    config: &PrepareConfig,
    downloader: &Downloader,
) -> Result<(), PrepareError> {
    ensure_destination(&config.docs_dir)
        .await
        .at(Step::EnsureDestination)?;
    info!(docs_dir = %config.docs_dir.display(), "docs destination ready");

    let bytes = downloader
        .fetch_to(&config.archive_url, &config.archive_path)
        .await
        .at(Step::FetchArchive)?;
    info!(url = %config.archive_url, bytes, "downloaded swagger ui archive");

    let summary = extract(&config.archive_path, &config.scratch_dir)
        .await
        .at(Step::ExtractArchive)?;
    info!(
        files = summary.files,
        directories = summary.directories,
        "extracted swagger ui archive"
    );

    relocate(&config.dist_source(), &config.docs_dir)
        .await
        .at(Step::RelocateDist)?;
    info!(
        from = %config.dist_source().display(),
        to = %config.docs_dir.display(),
        "moved dist into docs"
    );

    let replaced = rewrite_file(
        &config.entry_page(),
        &config.upstream_definition_url,
        &config.local_definition_name,
    )
    .await
    .at(Step::RewriteDefinitionUrl)?;
    info!(replaced, "rewrote definition url in entry page");

    let bytes = downloader
        .fetch_to(&config.definition_url, &config.definition_path())
        .await
        .at(Step::FetchDefinition)?;
    info!(url = %config.definition_url, bytes, "downloaded example definition");

    cleanup(&config.archive_path, &config.scratch_dir)
        .await
        .at(Step::Cleanup)?;
    info!("removed download artifacts");

    Ok(())
}

/// Creates the parent of the serving root and any missing ancestors.
pub async fn ensure_destination(docs_dir: &Path) -> Result<()> {
    let Some(parent) = docs_dir.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder
        .create(parent)
        .await
        .with_context(|| format!("cannot create directory {}", parent.display()))
}

/// Extracts the archive on the blocking pool and waits for it to finish.
pub async fn extract(archive_path: &Path, scratch_dir: &Path) -> Result<ExtractSummary> {
    let archive_path = archive_path.to_path_buf();
    let scratch_dir = scratch_dir.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || extract_zip(&archive_path, &scratch_dir))
        .await
        .map_err(|join_err| anyhow!(join_err))??;
    Ok(summary)
}

/// Renames the extracted dist directory into place as the serving root.
pub async fn relocate(source: &Path, docs_dir: &Path) -> Result<()> {
    let exists = fs::try_exists(source)
        .await
        .with_context(|| format!("cannot check extracted directory {}", source.display()))?;
    if !exists {
        return Err(anyhow!(
            "extracted directory {} does not exist",
            source.display()
        ));
    }
    fs::rename(source, docs_dir).await.with_context(|| {
        format!(
            "cannot rename {} to {}",
            source.display(),
            docs_dir.display()
        )
    })
}

/// Replaces every occurrence of `upstream` with `local`, byte for byte.
///
/// The input need not be valid UTF-8; bytes outside the matches are copied
/// unchanged.
pub fn rewrite_definition_url(contents: &[u8], upstream: &str, local: &str) -> (Vec<u8>, usize) {
    let needle = upstream.as_bytes();
    if needle.is_empty() {
        return (contents.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(contents.len());
    let mut rest = contents;
    let mut count = 0;
    while let Some(pos) = rest.windows(needle.len()).position(|window| window == needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(local.as_bytes());
        rest = &rest[pos + needle.len()..];
        count += 1;
    }
    out.extend_from_slice(rest);
    (out, count)
}

/// Rewrites `path` in place, returning how many occurrences were replaced.
/// An existing file keeps its permissions.
pub async fn rewrite_file(path: &Path, upstream: &str, local: &str) -> Result<usize> {
    let contents = fs::read(path)
        .await
        .with_context(|| format!("cannot read file '{}'", path.display()))?;
    let (rewritten, count) = rewrite_definition_url(&contents, upstream, local);
    fs::write(path, rewritten)
        .await
        .with_context(|| format!("cannot write file '{}'", path.display()))?;
    Ok(count)
}

/// Removes the downloaded archive and the extraction scratch directory.
pub async fn cleanup(archive_path: &Path, scratch_dir: &Path) -> Result<()> {
    fs::remove_file(archive_path)
        .await
        .with_context(|| format!("cannot remove swagger ui zip file {}", archive_path.display()))?;
    fs::remove_dir_all(scratch_dir).await.with_context(|| {
        format!(
            "cannot remove swagger ui zip contents directory {}",
            scratch_dir.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UPSTREAM: &str = "https://petstore.swagger.io/v2/swagger.json/definition.yml";

    #[test]
    fn rewrite_replaces_every_occurrence() {
        let html = format!("url: \"{UPSTREAM}\",\n<!-- {UPSTREAM} -->\n");
        let (out, count) = rewrite_definition_url(html.as_bytes(), UPSTREAM, "definition.yml");
        assert_eq!(count, 2);
        assert_eq!(out, b"url: \"definition.yml\",\n<!-- definition.yml -->\n");
    }

    #[test]
    fn rewrite_without_match_is_identity() {
        let html = "<html>\r\n  untouched \u{2603} bytes\n</html>";
        let (out, count) = rewrite_definition_url(html.as_bytes(), UPSTREAM, "definition.yml");
        assert_eq!(count, 0);
        assert_eq!(out, html.as_bytes());
    }

    #[test]
    fn rewrite_handles_adjacent_matches() {
        let html = format!("{UPSTREAM}{UPSTREAM}");
        let (out, count) = rewrite_definition_url(html.as_bytes(), UPSTREAM, "d.yml");
        assert_eq!(count, 2);
        assert_eq!(out, b"d.ymld.yml");
    }

    #[tokio::test]
    async fn rewrite_file_accepts_latin1_html() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.html");
        let mut original = b"<p>caf\xe9</p> ".to_vec();
        original.extend_from_slice(UPSTREAM.as_bytes());
        original.extend_from_slice(b"\xff\n");
        std::fs::write(&path, &original).unwrap();

        let count = rewrite_file(&path, UPSTREAM, "definition.yml").await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"<p>caf\xe9</p> definition.yml\xff\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rewrite_file_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, UPSTREAM).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o664)).unwrap();

        rewrite_file(&path, UPSTREAM, "definition.yml").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o664);
    }

    #[tokio::test]
    async fn rewrite_file_preserves_surrounding_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, format!("before {UPSTREAM} after")).unwrap();

        let count = rewrite_file(&path, UPSTREAM, "definition.yml").await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "before definition.yml after"
        );
    }

    #[tokio::test]
    async fn rewrite_file_fails_when_missing() {
        let dir = TempDir::new().unwrap();
        let err = rewrite_file(&dir.path().join("index.html"), UPSTREAM, "definition.yml")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read file"));
    }

    #[tokio::test]
    async fn ensure_destination_creates_ancestors_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("a/b/static/docs");

        ensure_destination(&docs).await.unwrap();
        ensure_destination(&docs).await.unwrap();

        assert!(dir.path().join("a/b/static").is_dir());
        assert!(!docs.exists());
    }

    #[tokio::test]
    async fn relocate_missing_source_leaves_tree_untouched() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("swag");
        std::fs::create_dir_all(scratch.join("swagger-ui-9.9.9/dist")).unwrap();
        let docs = dir.path().join("static/docs");

        let err = relocate(&scratch.join("swagger-ui-3.49.0/dist"), &docs)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("does not exist"));
        assert!(scratch.join("swagger-ui-9.9.9/dist").is_dir());
        assert!(!docs.exists());
    }

    #[tokio::test]
    async fn relocate_reports_stat_errors_instead_of_missing() {
        let dir = TempDir::new().unwrap();
        // A regular file where the scratch directory should be: stat fails with ENOTDIR.
        let scratch = dir.path().join("swag");
        std::fs::write(&scratch, b"not a directory").unwrap();
        let docs = dir.path().join("static/docs");

        let err = relocate(&scratch.join("dist"), &docs).await.unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("cannot check extracted directory"), "{message}");
        assert!(!message.contains("does not exist"), "{message}");
        assert!(!docs.exists());
    }

    #[tokio::test]
    async fn relocate_moves_directory() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("swag/dist");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("app.js"), b"js").unwrap();
        std::fs::create_dir_all(dir.path().join("static")).unwrap();
        let docs = dir.path().join("static/docs");

        relocate(&source, &docs).await.unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(docs.join("app.js")).unwrap(), b"js");
    }

    #[tokio::test]
    async fn cleanup_spares_serving_root() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("swag.zip");
        let scratch = dir.path().join("swag");
        let docs = dir.path().join("static/docs");
        std::fs::write(&archive, b"zip").unwrap();
        std::fs::create_dir_all(scratch.join("swagger-ui-3.49.0")).unwrap();
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("index.html"), b"ok").unwrap();

        cleanup(&archive, &scratch).await.unwrap();

        assert!(!archive.exists());
        assert!(!scratch.exists());
        assert_eq!(std::fs::read(docs.join("index.html")).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn cleanup_reports_missing_archive() {
        let dir = TempDir::new().unwrap();
        let err = cleanup(&dir.path().join("swag.zip"), &dir.path().join("swag"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot remove swagger ui zip file"));
    }

    #[test]
    fn completed_steps_precede_failure() {
        let err = PrepareError {
            step: Step::RelocateDist,
            source: anyhow!("boom"),
        };
        assert_eq!(
            err.completed_steps(),
            &[
                Step::EnsureDestination,
                Step::FetchArchive,
                Step::ExtractArchive
            ]
        );
        assert_eq!(err.to_string(), "cannot move swagger ui dist to docs");
    }
}
