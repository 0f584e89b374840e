use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use url::Url;

use crate::paths;

pub const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/swagger-api/swagger-ui/archive/refs/tags/v3.49.0.zip";
pub const DEFAULT_DEFINITION_URL: &str = "https://idratherbewriting.com/learnapidoc/docs/rest_api_specifications/openapi_openweathermap.yml";
pub const DEFAULT_UPSTREAM_DEFINITION_URL: &str =
    "https://petstore.swagger.io/v2/swagger.json/definition.yml";
pub const DEFAULT_LOCAL_DEFINITION_NAME: &str = "definition.yml";
pub const DEFAULT_ARCHIVE_PATH: &str = "swag.zip";
pub const DEFAULT_SCRATCH_DIR: &str = "swag";
pub const DEFAULT_DIST_SUBDIR: &str = "swagger-ui-3.49.0/dist";
pub const DEFAULT_DOCS_DIR: &str = "static/docs";
pub const ENTRY_PAGE: &str = "index.html";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Parser)]
#[command(
    name = "prepare-docs",
    version,
    about = "Download Swagger UI and an example definition into the static docs directory."
)]
pub struct PrepareArgs {
    /// Swagger UI release archive to download.
    #[arg(long, default_value = DEFAULT_ARCHIVE_URL)]
    pub archive_url: String,

    /// API definition document served next to the UI.
    #[arg(long, default_value = DEFAULT_DEFINITION_URL)]
    pub definition_url: String,

    /// Where the downloaded archive is written.
    #[arg(long, default_value = DEFAULT_ARCHIVE_PATH)]
    pub archive_path: PathBuf,

    /// Directory the archive is extracted into.
    #[arg(long, default_value = DEFAULT_SCRATCH_DIR)]
    pub scratch_dir: PathBuf,

    /// Subdirectory of the extracted archive that becomes the docs directory.
    #[arg(long, default_value = DEFAULT_DIST_SUBDIR)]
    pub dist_subdir: PathBuf,

    /// Serving root produced by the run.
    #[arg(long, default_value = DEFAULT_DOCS_DIR)]
    pub docs_dir: PathBuf,

    /// Definition URL referenced by the upstream index.html.
    #[arg(long, default_value = DEFAULT_UPSTREAM_DEFINITION_URL)]
    pub upstream_definition_url: String,

    /// File name the definition document is stored under.
    #[arg(long, default_value = DEFAULT_LOCAL_DEFINITION_NAME)]
    pub local_definition_name: String,
}

#[derive(Debug, Parser)]
#[command(
    name = "docs-server",
    version,
    about = "Serve the embedded static tree over HTTP.",
    long_about = "Serve the embedded static tree over HTTP.\n\n\
        `/` serves the landing page and the prepared Swagger UI is served \
        under `/docs/` (files prepared into static/docs)."
)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to bind the HTTP server to.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Serve this directory (read into memory at startup) instead of the embedded tree.
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub archive_url: Url,
    pub definition_url: Url,
    pub archive_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub dist_subdir: PathBuf,
    pub docs_dir: PathBuf,
    pub upstream_definition_url: String,
    pub local_definition_name: String,
}

impl PrepareConfig {
    pub fn from_cli() -> Result<Self> {
        PrepareConfig::from_parts(PrepareArgs::parse())
    }

    pub fn from_parts(args: PrepareArgs) -> Result<Self> {
        let archive_url = Url::parse(&args.archive_url)
            .with_context(|| format!("invalid archive url: {}", args.archive_url))?;
        let definition_url = Url::parse(&args.definition_url)
            .with_context(|| format!("invalid definition url: {}", args.definition_url))?;

        if args.local_definition_name.is_empty() {
            return Err(anyhow!("local definition name must not be empty"));
        }
        if args
            .local_definition_name
            .contains(['/', std::path::MAIN_SEPARATOR])
        {
            return Err(anyhow!(
                "local definition name must be a bare file name, got {}",
                args.local_definition_name
            ));
        }
        if args.dist_subdir.as_os_str().is_empty() {
            return Err(anyhow!("dist subdirectory must not be empty"));
        }

        Ok(Self {
            archive_url,
            definition_url,
            archive_path: args.archive_path,
            scratch_dir: args.scratch_dir,
            dist_subdir: args.dist_subdir,
            docs_dir: args.docs_dir,
            upstream_definition_url: args.upstream_definition_url,
            local_definition_name: args.local_definition_name,
        })
    }

    /// Extracted directory that gets renamed into the docs directory.
    pub fn dist_source(&self) -> PathBuf {
        self.scratch_dir.join(&self.dist_subdir)
    }

    pub fn entry_page(&self) -> PathBuf {
        paths::join([self.docs_dir.as_path(), Path::new(ENTRY_PAGE)])
    }

    pub fn definition_path(&self) -> PathBuf {
        paths::join([
            self.docs_dir.as_path(),
            Path::new(&self.local_definition_name),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub root: Option<PathBuf>,
}

impl ServeConfig {
    pub fn from_cli() -> Result<Self> {
        ServeConfig::from_parts(ServeArgs::parse())
    }

    pub fn from_parts(args: ServeArgs) -> Result<Self> {
        if let Some(root) = &args.root
            && !root.is_dir()
        {
            return Err(anyhow!("serving root {} is not a directory", root.display()));
        }
        Ok(Self {
            bind: args.bind,
            port: args.port,
            root: args.root,
        })
    }
}
