//! Error taxonomy for the retrieval and grounding pipeline.
//!
//! Collaborator seams (embedder, stores, generator) report failures as
//! [`anyhow::Error`]. The extractor classifies its own failures, since a
//! missing source and an unreadable one need different answers. The
//! pipeline surface wraps everything into
//! [`RagError`], whose variants fall into three classes that callers must
//! be able to tell apart:
//!
//! | Class | Variants | Retry? |
//! |-------|----------|--------|
//! | [`ErrorKind::Validation`] | `InvalidInput`, `Config` | never |
//! | [`ErrorKind::Upstream`] | `Upstream`, `NotFound`, `Unextractable` | by the caller |
//! | [`ErrorKind::Grounding`] | `NoRelevantContent`, `Ungroundable` | no, user-actionable |

use std::fmt;

use thiserror::Error;

/// The external capability a failed call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Embed,
    Search,
    Generate,
    Storage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extraction",
            Stage::Embed => "embedding",
            Stage::Search => "vector index",
            Stage::Generate => "generation",
            Stage::Storage => "chunk storage",
        };
        f.write_str(name)
    }
}

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Upstream,
    Grounding,
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage} unavailable: {source:#}")]
    Upstream {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("source not found: {0}")]
    NotFound(String),

    #[error("no text could be extracted: {0}")]
    Unextractable(String),

    #[error("no relevant content found for the query")]
    NoRelevantContent,

    #[error("could not ground an answer after {attempts} attempts: {reason}")]
    Ungroundable { attempts: u32, reason: String },
}

impl RagError {
    pub fn upstream(stage: Stage, source: anyhow::Error) -> Self {
        RagError::Upstream { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::InvalidInput(_) | RagError::Config(_) => ErrorKind::Validation,
            RagError::Upstream { .. } | RagError::NotFound(_) | RagError::Unextractable(_) => {
                ErrorKind::Upstream
            }
            RagError::NoRelevantContent | RagError::Ungroundable { .. } => ErrorKind::Grounding,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Attach a [`Stage`] to a collaborator result.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageContext<T> for anyhow::Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| RagError::upstream(stage, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct_per_class() {
        assert_eq!(
            RagError::InvalidInput("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(RagError::Config("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            RagError::upstream(Stage::Embed, anyhow::anyhow!("down")).kind(),
            ErrorKind::Upstream
        );
        assert_eq!(RagError::NoRelevantContent.kind(), ErrorKind::Grounding);
        assert_eq!(
            RagError::Ungroundable {
                attempts: 3,
                reason: "no citations".into()
            }
            .kind(),
            ErrorKind::Grounding
        );
    }

    #[test]
    fn stage_context_wraps_anyhow() {
        let r: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = r.stage(Stage::Generate).unwrap_err();
        assert!(err.to_string().contains("generation unavailable"));
        assert!(err.to_string().contains("connection refused"));
    }
}
