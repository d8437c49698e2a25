pub mod client;
pub mod errors;
pub mod identity;
pub mod types;

pub use client::{AdoClient, PullRequestApi};
pub use errors::AdoError;
pub use identity::IdentityResolver;
pub use types::{
    AbandonSpec, ApproveSpec, AutoCompleteOptions, ChangeType, CommitAuthor, FileChange,
    MergeStrategy, PullRequestProperties, PullRequestProperty, PullRequestSpec, UpdateSpec,
};
