use tracing::{debug, info, warn};

use crate::error::{ChallengeError, Stage, StageFailure};
use crate::types::{ResolutionRecord, Session};

pub mod animepahe;
pub mod kisskh;

/// Episode descriptor produced by the listing stage.
pub trait EpisodeRef {
    fn number(&self) -> f64;
    fn name(&self) -> &str;
}

/// Turns one site's episode descriptors into direct stream links.
#[allow(async_fn_in_trait)]
pub trait StreamResolver {
    type Episode: EpisodeRef;

    fn site(&self) -> &str;

    /// Session shared read-only by every episode of a batch.
    async fn establish_session(&mut self) -> Result<Session, ChallengeError>;

    async fn resolve(
        &mut self,
        session: &Session,
        episode: &Self::Episode,
    ) -> Result<ResolutionRecord, StageFailure>;
}

/// Resolves `episodes` in order, one record per episode.
///
/// Only a failure to establish the session aborts the batch; any other
/// failure is written into that episode's record.
pub async fn resolve_batch<R: StreamResolver>(
    resolver: &mut R,
    episodes: &[R::Episode],
) -> Result<Vec<ResolutionRecord>, ChallengeError> {
    let session = resolver.establish_session().await?;
    let mut records = Vec::with_capacity(episodes.len());

    for episode in episodes {
        debug!(
            site = resolver.site(),
            episode = episode.number(),
            stage = %Stage::Pending,
            "resolving episode"
        );
        let record = match resolver.resolve(&session, episode).await {
            Ok(record) => {
                info!(
                    site = resolver.site(),
                    stage = %Stage::Resolved,
                    "{}",
                    record.summary()
                );
                record
            }
            Err(failure) => {
                warn!(
                    site = resolver.site(),
                    episode = episode.number(),
                    stage = %failure.stage,
                    "{failure}"
                );
                ResolutionRecord::failed(episode.number(), episode.name(), failure.to_string())
            }
        };
        records.push(record);
    }

    Ok(records)
}
