//! Discovery workers (C6): one task per (centre, source), populating the tracker with package,
//! action, and hosting rows.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::db::{Centre, FileSource, Tracker};
use crate::error::Error;
use crate::rating::{AffinityRating, Candidate, SourceRating};
use crate::tokenizer::{Tokenizer, Tokens};
use crate::transport::{self, RemoteEntry, SourceCredentials};
use crate::types::{Phase, ProcessingType, SourceProtocol, Status};

/// Bounded discovery pool: one task per live (centre, source) pair, capped at `pool_size`
/// concurrent tasks.
pub struct Discovery {
    tracker: Tracker,
    tokenizer: Arc<Tokenizer>,
    rating: Arc<dyn SourceRating>,
    pool_size: usize,
}

impl Discovery {
    /// Build a discovery pool over `tracker`, using `tokenizer` to parse archive names and the
    /// default [`AffinityRating`] strategy to seed hosting-relation ratings.
    pub fn new(tracker: Tracker, tokenizer: Arc<Tokenizer>, pool_size: usize) -> Self {
        Self {
            tracker,
            tokenizer,
            rating: Arc::new(AffinityRating),
            pool_size: pool_size.max(1),
        }
    }

    /// Run discovery once over every active centre's available file sources, draining fully
    /// before returning. Per-source failures are logged and do not abort the run.
    pub async fn run(&self) -> Result<(), Error> {
        let centres = self.tracker.active_centres().await?;
        let mut jobs = Vec::new();
        for centre in centres {
            let sources = self.tracker.available_file_sources(centre.id).await?;
            for source in sources {
                jobs.push((centre.clone(), source));
            }
        }

        tracing::info!(jobs = jobs.len(), pool_size = self.pool_size, "starting discovery");

        stream::iter(jobs)
            .for_each_concurrent(self.pool_size, |(centre, source)| async move {
                if let Err(e) = self.discover_one(&centre, &source).await {
                    tracing::warn!(
                        centre = %centre.short_name,
                        source_id = source.id.get(),
                        error = %e,
                        "discovery task failed"
                    );
                }
            })
            .await;

        Ok(())
    }

    async fn discover_one(&self, centre: &Centre, source: &FileSource) -> Result<(), Error> {
        if matches!(source.protocol, SourceProtocol::Http) {
            tracing::warn!(
                source_id = source.id.get(),
                "no discovery driver registered for http, skipping"
            );
            return Ok(());
        }

        let credentials = SourceCredentials {
            username: source.username.clone(),
            password: source.password.clone(),
        };

        let mut driver = match transport::connect(source.protocol, &source.hostname, &credentials).await {
            Ok(driver) => driver,
            Err(e) => {
                tracing::warn!(host = %source.hostname, error = %e, "could not connect, skipping source");
                return Ok(());
            }
        };

        for todo in ProcessingType::ALL {
            let path = join_remote_path(&source.base_path, todo.dir_name());
            match driver.list(&path).await {
                Ok(entries) => {
                    for entry in entries {
                        if let Err(e) = self.record_entry(centre, source, todo, &entry).await {
                            tracing::warn!(entry = %entry.name, error = %e, "failed to record discovered entry");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "listing failed, skipping sub-directory");
                }
            }
        }

        driver.disconnect().await;
        Ok(())
    }

    async fn record_entry(
        &self,
        centre: &Centre,
        source: &FileSource,
        todo: ProcessingType,
        entry: &RemoteEntry,
    ) -> Result<(), Error> {
        let tokens = self.tokenizer.tokenize(&entry.name);

        let producing_centre_id = match &tokens {
            Tokens::Zip(t) => self.tracker.find_centre(&t.centre).await?.map(|c| c.id),
            _ => None,
        };

        let zip_tokens = match &tokens {
            Tokens::Zip(t) => Some(t),
            _ => None,
        };

        let zip_file_id = self
            .tracker
            .get_or_create_zip_file(&entry.name, producing_centre_id, zip_tokens)
            .await?;
        if let Some(size) = entry.size {
            self.tracker.set_zip_file_size(zip_file_id, size as i64).await?;
        }

        let action_id = self.tracker.get_or_create_zip_action(zip_file_id, todo).await?;
        self.tracker
            .escalate_zip_action(action_id, Phase::ZipName, Status::Running)
            .await?;

        let outcome = if zip_tokens.is_some() { Status::Done } else { Status::Failed };
        self.tracker.escalate_zip_action(action_id, Phase::ZipName, outcome).await?;

        let fshz_id = self
            .tracker
            .get_or_create_file_source_has_zip(source.id, action_id)
            .await?;

        let same_centre = producing_centre_id == Some(centre.id);
        let rating = self.rating.rate(&Candidate {
            source_id: fshz_id.get(),
            same_centre,
        });
        self.tracker.set_rating(fshz_id, rating).await?;

        Ok(())
    }
}

fn join_remote_path(base_path: &str, todo: &str) -> String {
    if base_path.ends_with('/') {
        format!("{base_path}{todo}")
    } else {
        format!("{base_path}/{todo}")
    }
}
