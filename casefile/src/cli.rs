use casefile_core::model::{CandidateId, CandidateStatus, ProjectId, SnapshotId};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Truth versioning and consistency checks for murder-mystery scripts.
#[derive(Debug, Parser)]
#[command(name = "casefile", version)]
pub struct Cli {
    /// Configuration file (defaults to ./casefile.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Identity to act as.
    #[arg(long, global = true, env = "CASEFILE_USER")]
    pub user: Option<String>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a project with an empty draft truth.
    Init {
        name: String,
    },
    /// Replace the draft truth.
    Draft(DraftArgs),
    /// Freeze the truth into the next snapshot.
    Lock {
        project: ProjectId,
    },
    /// Return the truth to draft.
    Unlock {
        project: ProjectId,
    },
    /// List snapshots, oldest first.
    History {
        project: ProjectId,
    },
    /// Generate content from a snapshot.
    Derive(DeriveArgs),
    /// List staged candidates.
    Candidates {
        project: ProjectId,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Commit a staged candidate into its module.
    Accept {
        candidate: CandidateId,
    },
    /// Discard a staged candidate.
    Reject {
        candidate: CandidateId,
    },
    /// Run the publish gate.
    Gate {
        project: ProjectId,
    },
}

#[derive(Debug, Args)]
pub struct DraftArgs {
    pub project: ProjectId,

    /// Document JSON, or plain text to wrap in a paragraph.
    #[arg(long, conflicts_with = "text")]
    pub file: Option<PathBuf>,

    /// Plain text content.
    #[arg(long)]
    pub text: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeriveArgs {
    pub project: ProjectId,

    /// outline, worldcheck, story, role, clue, timeline or dm.
    pub action: String,

    /// Print output as it arrives.
    #[arg(long)]
    pub stream: bool,

    /// Stage candidates for review instead of committing them.
    #[arg(long)]
    pub staged: bool,

    /// Snapshot to derive from (defaults to the latest).
    #[arg(long)]
    pub snapshot: Option<SnapshotId>,

    /// Guidance for the model.
    #[arg(long)]
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Accepted,
    Rejected,
}

impl From<StatusArg> for CandidateStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => CandidateStatus::Pending,
            StatusArg::Accepted => CandidateStatus::Accepted,
            StatusArg::Rejected => CandidateStatus::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_derive_flags() {
        let project = ProjectId::new();
        let cli = Cli::try_parse_from([
            "casefile",
            "--user",
            "alice",
            "derive",
            &project.to_string(),
            "role",
            "--stream",
            "--intent",
            "多一些反转",
        ])
        .unwrap();

        assert_eq!(cli.user.as_deref(), Some("alice"));
        let Commands::Derive(args) = cli.command else {
            panic!("expected derive");
        };
        assert_eq!(args.project, project);
        assert_eq!(args.action, "role");
        assert!(args.stream);
        assert!(!args.staged);
        assert_eq!(args.intent.as_deref(), Some("多一些反转"));
    }

    #[test]
    fn test_bad_project_id_is_rejected() {
        assert!(Cli::try_parse_from(["casefile", "lock", "not-a-uuid"]).is_err());
    }
}
