//! Configuration (C11, ambient): CLI surface plus the runtime settings it resolves to.
//!
//! Two layers, matching §6's flag table. [`CliArgs`] is parsed with `clap`'s derive API and
//! bounds-checked as part of parsing; [`RuntimeConfig`] merges the parsed args with the required
//! crawler properties file (and the four optional tool properties files) into the settings the
//! session orchestrator actually runs with.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::Error;
use crate::properties::Properties;

/// Command-line arguments, validated per §6's bounds table at parse time.
#[derive(Debug, Parser)]
#[command(name = "crawler", about = "Periodic multi-source ingestion pipeline")]
pub struct CliArgs {
    /// Number of parallel downloaders.
    #[arg(short = 'a', default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub downloaders: u32,

    /// Per-source retry count.
    #[arg(short = 'm', default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=5))]
    pub retries: u32,

    /// Discovery/extraction pool size.
    #[arg(short = 't', default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub pool_size: u32,

    /// Periodic run delay in hours; 0 means one-shot.
    #[arg(short = 'p', default_value_t = 0)]
    pub period_hours: u32,

    /// Local data directory.
    #[arg(short = 'd', default_value = "backup")]
    pub data_dir: PathBuf,

    /// E-mail address for the run report.
    #[arg(short = 'r')]
    pub report_email: Option<String>,

    /// Crawler properties file (required).
    #[arg(short = 'c')]
    pub crawler_properties: PathBuf,

    /// Serializer properties file.
    #[arg(short = 's')]
    pub serializer_properties: Option<PathBuf>,

    /// XML validator properties file.
    #[arg(short = 'v')]
    pub validator_properties: Option<PathBuf>,

    /// XML validation-resources properties file.
    #[arg(short = 'x')]
    pub resources_properties: Option<PathBuf>,

    /// Context-builder properties file.
    #[arg(short = 'o')]
    pub context_builder_properties: Option<PathBuf>,
}

impl CliArgs {
    /// Validate the filesystem-dependent bounds clap's derive can't express: `-d` must be
    /// nonempty (guaranteed by `PathBuf` parsing from a non-blank arg, but an explicitly blank
    /// value would otherwise slip through) and every properties-file flag must name a readable
    /// file.
    pub fn validate(&self) -> Result<(), Error> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("-d data directory must not be empty".into()));
        }
        if let Some(email) = &self.report_email {
            if email.trim().is_empty() {
                return Err(Error::Config("-r, if present, must not be empty".into()));
            }
        }
        check_readable(&self.crawler_properties, "-c")?;
        for (path, flag) in [
            (&self.serializer_properties, "-s"),
            (&self.validator_properties, "-v"),
            (&self.resources_properties, "-x"),
            (&self.context_builder_properties, "-o"),
        ] {
            if let Some(path) = path {
                check_readable(path, flag)?;
            }
        }
        Ok(())
    }
}

fn check_readable(path: &Path, flag: &str) -> Result<(), Error> {
    std::fs::metadata(path)
        .map_err(|source| Error::Config(format!("{flag} properties file {}: {source}", path.display())))
        .and_then(|meta| {
            if meta.is_file() {
                Ok(())
            } else {
                Err(Error::Config(format!("{flag} properties file {} is not a regular file", path.display())))
            }
        })
}

/// Paths to the optional downstream subprocess tools' properties files, resolved from the CLI.
/// Any field left `None` means that tool's stage is skipped with a warning rather than invoked.
#[derive(Debug, Clone, Default)]
pub struct ToolProperties {
    /// Serializer (upload) subprocess properties.
    pub serializer: Option<PathBuf>,
    /// XML schema validator subprocess properties.
    pub validator: Option<PathBuf>,
    /// XML validation-resources properties, paired with `validator`.
    pub resources: Option<PathBuf>,
    /// Context-builder subprocess properties.
    pub context_builder: Option<PathBuf>,
    /// Integrity-checker subprocess properties. Has no dedicated CLI flag; read from the
    /// crawler properties file like the tool binary paths below.
    pub integrity_checker: Option<PathBuf>,
}

/// Fully resolved runtime settings: CLI args merged with the crawler properties file.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of parallel downloaders (`-a`).
    pub downloaders: usize,
    /// Per-source retry count (`-m`).
    pub retries: u32,
    /// Discovery/extraction pool size (`-t`).
    pub pool_size: usize,
    /// Periodic run delay; `None` means one-shot.
    pub period: Option<std::time::Duration>,
    /// Local data directory (`-d`), containing `add/`, `edit/`, `delete/`.
    pub data_dir: PathBuf,
    /// Run-report recipient (`-r`), if configured.
    pub report_email: Option<String>,
    /// Tracker database path, read from the crawler properties file.
    pub database_path: PathBuf,
    /// Downstream subprocess tool properties.
    pub tools: ToolProperties,
    /// Path to the validator binary itself (read from the crawler properties, since the `-v`
    /// flag only supplies its *properties* file).
    pub validator_bin: Option<PathBuf>,
    /// Path to the serializer binary.
    pub serializer_bin: Option<PathBuf>,
    /// Path to the context-builder binary.
    pub context_builder_bin: Option<PathBuf>,
    /// Path to the overview-builder binary (`-o`'s tool has no dedicated properties flag beyond
    /// the context-builder's, per §4.9 — the overview step reuses the context-builder's db
    /// connection properties).
    pub overview_builder_bin: Option<PathBuf>,
    /// Path to the integrity-checker binary.
    pub integrity_checker_bin: Option<PathBuf>,
    /// Name of the overview database, passed as the overview-builder's sole argument.
    pub overview_database_name: Option<String>,
    /// Archive filename pattern (§4.2), read from the crawler properties file.
    pub tokenizer_zip_pattern: String,
    /// Inner-document filename pattern (§4.2).
    pub tokenizer_xml_pattern: String,
    /// Recognized centre short-names, comma-separated in the properties file.
    pub known_centres: Vec<String>,
    /// SMTP relay host for the `-r` run report, read from the crawler properties file.
    /// Defaults to `localhost`, the usual local MTA relay, when unset.
    pub smtp_relay_host: String,
}

impl RuntimeConfig {
    /// Resolve a [`RuntimeConfig`] by validating `args` and loading the required crawler
    /// properties file (plus probing the optional tool properties files only for readability,
    /// already done in [`CliArgs::validate`]).
    pub async fn load(args: &CliArgs) -> Result<Self, Error> {
        args.validate()?;

        let crawler = Properties::load(&args.crawler_properties).await?;
        let database_path = PathBuf::from(crawler.get_required("tracker.database.path")?);

        let period = if args.period_hours == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(u64::from(args.period_hours) * 3600))
        };

        Ok(Self {
            downloaders: args.downloaders as usize,
            retries: args.retries,
            pool_size: args.pool_size as usize,
            period,
            data_dir: args.data_dir.clone(),
            report_email: args.report_email.clone(),
            database_path,
            tools: ToolProperties {
                serializer: args.serializer_properties.clone(),
                validator: args.validator_properties.clone(),
                resources: args.resources_properties.clone(),
                context_builder: args.context_builder_properties.clone(),
                integrity_checker: crawler.get("integrity-checker.properties").map(PathBuf::from),
            },
            validator_bin: crawler.get("validator.bin").map(PathBuf::from),
            serializer_bin: crawler.get("serializer.bin").map(PathBuf::from),
            context_builder_bin: crawler.get("context-builder.bin").map(PathBuf::from),
            overview_builder_bin: crawler.get("overview-builder.bin").map(PathBuf::from),
            integrity_checker_bin: crawler.get("integrity-checker.bin").map(PathBuf::from),
            overview_database_name: crawler.get("overview.database.name").map(str::to_string),
            tokenizer_zip_pattern: crawler.get_required("tokenizer.zip.pattern")?.to_string(),
            tokenizer_xml_pattern: crawler.get_required("tokenizer.xml.pattern")?.to_string(),
            known_centres: crawler
                .get_required("tokenizer.known.centres")?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            smtp_relay_host: crawler.get("smtp.relay.host").unwrap_or("localhost").to_string(),
        })
    }

    /// The three pre-created subdirectories under [`Self::data_dir`].
    pub fn todo_dirs(&self) -> [PathBuf; 3] {
        [
            self.data_dir.join("add"),
            self.data_dir.join("edit"),
            self.data_dir.join("delete"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_crawler_properties() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler.properties");
        std::fs::write(
            &path,
            "tracker.database.path=tracker.sqlite\n\
             validator.bin=/usr/bin/xsd-validate\n\
             tokenizer.zip.pattern=^([A-Z]+)_(\\d{4})(\\d{2})(\\d{2})_(\\d+)\\.zip$\n\
             tokenizer.xml.pattern=^([A-Z]+)_(\\d{4})(\\d{2})(\\d{2})_(\\d+)_(specimen|experiment)\\.xml$\n\
             tokenizer.known.centres=ABCD,WXYZ\n",
        )
        .unwrap();
        (dir, path)
    }

    fn args_with(crawler_properties: PathBuf, data_dir: PathBuf) -> CliArgs {
        CliArgs {
            downloaders: 1,
            retries: 1,
            pool_size: 10,
            period_hours: 0,
            data_dir,
            report_email: None,
            crawler_properties,
            serializer_properties: None,
            validator_properties: None,
            resources_properties: None,
            context_builder_properties: None,
        }
    }

    #[test]
    fn rejects_empty_data_dir() {
        let (_dir, crawler) = sample_crawler_properties();
        let args = args_with(crawler, PathBuf::new());
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_missing_crawler_properties_file() {
        let args = args_with(PathBuf::from("/nonexistent/crawler.properties"), PathBuf::from("backup"));
        assert!(args.validate().is_err());
    }

    #[tokio::test]
    async fn loads_runtime_config_from_crawler_properties() {
        let (_dir, crawler) = sample_crawler_properties();
        let args = args_with(crawler, PathBuf::from("backup"));
        let config = RuntimeConfig::load(&args).await.unwrap();
        assert_eq!(config.database_path, PathBuf::from("tracker.sqlite"));
        assert_eq!(config.validator_bin, Some(PathBuf::from("/usr/bin/xsd-validate")));
        assert_eq!(config.period, None);
    }

    #[tokio::test]
    async fn nonzero_period_hours_becomes_a_duration() {
        let (_dir, crawler) = sample_crawler_properties();
        let mut args = args_with(crawler, PathBuf::from("backup"));
        args.period_hours = 6;
        let config = RuntimeConfig::load(&args).await.unwrap();
        assert_eq!(config.period, Some(std::time::Duration::from_secs(6 * 3600)));
    }

    #[test]
    fn todo_dirs_are_relative_to_data_dir() {
        let args = args_with(PathBuf::from("irrelevant"), PathBuf::from("backup"));
        let config = RuntimeConfig {
            downloaders: 1,
            retries: 1,
            pool_size: 10,
            period: None,
            data_dir: args.data_dir.clone(),
            report_email: None,
            database_path: PathBuf::from("tracker.sqlite"),
            tools: ToolProperties::default(),
            validator_bin: None,
            serializer_bin: None,
            context_builder_bin: None,
            overview_builder_bin: None,
            integrity_checker_bin: None,
            overview_database_name: None,
            tokenizer_zip_pattern: String::new(),
            tokenizer_xml_pattern: String::new(),
            known_centres: Vec::new(),
            smtp_relay_host: "localhost".to_string(),
        };
        let dirs = config.todo_dirs();
        assert_eq!(dirs[0], PathBuf::from("backup/add"));
        assert_eq!(dirs[1], PathBuf::from("backup/edit"));
        assert_eq!(dirs[2], PathBuf::from("backup/delete"));
    }
}
