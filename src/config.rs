//! Run configuration: YAML file, built-in defaults and CLI overrides.
//!
//! Resolution order is defaults, then the file given with `--config`, then
//! CLI/environment values. The result is validated once into [`Settings`];
//! every selector is parsed up front so a typo fails the run before any page
//! is fetched.
//!
//! ```yaml
//! target_url: https://www.yogonet.com/international/
//! render_timeout_secs: 20
//! selectors:
//!   container: .contenedor_dato_modulo
//!   title:
//!     - css: .titulo a
//!   link:
//!     - css: .titulo a
//!       attr: href
//! warehouse:
//!   project: acme
//!   dataset: news
//!   table: articles
//!   credentials: /secrets/token.txt
//! ```

use crate::browser::parse_selector;
use crate::cli::Cli;
use crate::error::ConfigError;
use crate::retry::Backoff;
use crate::scrapers::extractor::{FieldExtractor, FieldLookup, LookupRule};
use crate::warehouse::TableRef;
use crate::warehouse::bigquery::DEFAULT_ENDPOINT;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const DEFAULT_TARGET_URL: &str = "https://www.yogonet.com/international/";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36";

/// Where to find each field inside one article block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Matches one repeating article block.
    pub container: String,
    pub title: FieldLookup,
    pub kicker: FieldLookup,
    pub link: FieldLookup,
    pub image: FieldLookup,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            container: ".contenedor_dato_modulo".to_string(),
            title: FieldLookup::new(vec![
                LookupRule::text(".titulo a"),
                LookupRule::text("h2 a"),
                LookupRule::text("h2"),
            ]),
            kicker: FieldLookup::new(vec![
                LookupRule::text(".volanta"),
                LookupRule::text(".volanta.fuente_roboto_slab"),
                LookupRule::text(".volanta_noticia"),
                LookupRule::text(".volanta_noticia.fuente_roboto_slab"),
                LookupRule::text(".volanta_titulo .volanta"),
                LookupRule::text("div.volanta"),
            ]),
            link: FieldLookup::new(vec![
                LookupRule::attr(".titulo a", "href"),
                LookupRule::attr("h2 a", "href"),
                LookupRule::attr("a[href]", "href"),
            ]),
            image: FieldLookup::new(vec![
                LookupRule::attr("img[src]", "src"),
                LookupRule::attr("img[data-src]", "data-src"),
            ]),
        }
    }
}

impl From<&SelectorConfig> for FieldExtractor {
    fn from(selectors: &SelectorConfig) -> Self {
        FieldExtractor {
            title: selectors.title.clone(),
            kicker: selectors.kicker.clone(),
            link: selectors.link.clone(),
            image: selectors.image.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
    pub credentials: Option<PathBuf>,
    pub endpoint: Option<String>,
}

/// Shape of the YAML config file. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub target_url: String,
    pub render_timeout_secs: u64,
    pub render_attempts: usize,
    pub retry_delay_secs: u64,
    pub user_agent: String,
    pub selectors: SelectorConfig,
    pub warehouse: WarehouseConfig,
    pub json_output_dir: Option<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            target_url: DEFAULT_TARGET_URL.to_string(),
            render_timeout_secs: 20,
            render_attempts: 3,
            retry_delay_secs: 5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            selectors: SelectorConfig::default(),
            warehouse: WarehouseConfig::default(),
            json_output_dir: None,
        }
    }
}

impl FileConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        info!(path, "Loaded configuration file");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(url) = &cli.url {
            self.target_url = url.clone();
        }
        if let Some(secs) = cli.render_timeout {
            self.render_timeout_secs = secs;
        }
        if let Some(project) = &cli.project {
            self.warehouse.project = Some(project.clone());
        }
        if let Some(dataset) = &cli.dataset {
            self.warehouse.dataset = Some(dataset.clone());
        }
        if let Some(table) = &cli.table {
            self.warehouse.table = Some(table.clone());
        }
        if let Some(credentials) = &cli.credentials {
            self.warehouse.credentials = Some(credentials.clone());
        }
        if let Some(dir) = &cli.json_output_dir {
            self.json_output_dir = Some(dir.clone());
        }
    }
}

/// Where the batch goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// In-memory table; nothing leaves the process.
    DryRun { table: TableRef },
    BigQuery {
        table: TableRef,
        credentials: PathBuf,
        endpoint: String,
    },
}

impl Destination {
    pub fn table(&self) -> &TableRef {
        match self {
            Destination::DryRun { table } | Destination::BigQuery { table, .. } => table,
        }
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target_url: Url,
    pub render_timeout: Duration,
    pub render_backoff: Backoff,
    pub user_agent: String,
    pub selectors: SelectorConfig,
    pub destination: Destination,
    pub json_output_dir: Option<String>,
}

impl Settings {
    /// Merge the config file (if any) with CLI values and validate the result.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        file.apply(cli);
        Self::validate(file, cli.dry_run)
    }

    pub fn validate(file: FileConfig, dry_run: bool) -> Result<Self, ConfigError> {
        let target_url = Url::parse(&file.target_url)
            .map_err(|e| ConfigError::Invalid(format!("target_url `{}`: {e}", file.target_url)))?;
        if !matches!(target_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "target_url must be http(s), got `{}`",
                target_url.scheme()
            )));
        }

        if file.render_timeout_secs == 0 {
            return Err(ConfigError::Invalid("render_timeout_secs must be positive".to_string()));
        }

        validate_selectors(&file.selectors)?;

        let destination = resolve_destination(file.warehouse, dry_run)?;
        debug!(?destination, "Resolved destination");

        Ok(Settings {
            target_url,
            render_timeout: Duration::from_secs(file.render_timeout_secs),
            render_backoff: Backoff::new(
                file.render_attempts,
                Duration::from_secs(file.retry_delay_secs),
            ),
            user_agent: file.user_agent,
            selectors: file.selectors,
            destination,
            json_output_dir: file.json_output_dir,
        })
    }
}

fn validate_selectors(selectors: &SelectorConfig) -> Result<(), ConfigError> {
    let invalid = |field: &str, e| ConfigError::Invalid(format!("selectors.{field}: {e}"));

    parse_selector(&selectors.container).map_err(|e| invalid("container", e))?;

    let lookups = [
        ("title", &selectors.title),
        ("kicker", &selectors.kicker),
        ("link", &selectors.link),
        ("image", &selectors.image),
    ];
    for (field, lookup) in lookups {
        for rule in lookup.rules() {
            parse_selector(rule.css()).map_err(|e| invalid(field, e))?;
        }
    }

    for (field, lookup) in [("title", &selectors.title), ("link", &selectors.link)] {
        if lookup.rules().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "selectors.{field} needs at least one lookup rule"
            )));
        }
    }
    Ok(())
}

fn resolve_destination(warehouse: WarehouseConfig, dry_run: bool) -> Result<Destination, ConfigError> {
    if dry_run {
        let table = TableRef {
            project: warehouse.project.unwrap_or_else(|| "local".to_string()),
            dataset: warehouse.dataset.unwrap_or_else(|| "news".to_string()),
            table: warehouse.table.unwrap_or_else(|| "articles".to_string()),
        };
        return Ok(Destination::DryRun { table });
    }

    let require = |value: Option<String>, name: &str| {
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid(format!("warehouse.{name} is required (or pass --dry-run)")))
    };

    let table = TableRef {
        project: require(warehouse.project, "project")?,
        dataset: require(warehouse.dataset, "dataset")?,
        table: require(warehouse.table, "table")?,
    };
    let credentials = warehouse.credentials.ok_or_else(|| {
        ConfigError::Invalid("warehouse.credentials is required (or pass --dry-run)".to_string())
    })?;

    Ok(Destination::BigQuery {
        table,
        credentials,
        endpoint: warehouse
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
    })
}
