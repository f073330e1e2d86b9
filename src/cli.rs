use clap::{Parser, Subcommand};

/// Vigil: API token issuance and verification
#[derive(Parser)]
#[command(name = "vigil", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Port to bind (overrides VIGIL_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations
    Migrate,

    /// Manage API tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Manage accounts known to the backend
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Create a new token; only the token is written to stdout
    Create {
        /// Account (username) the token acts for
        account: String,
        /// Revoke the account's existing tokens after issuing
        #[arg(long)]
        rotate: bool,
    },
    /// List an account's tokens (metadata only)
    List { account: String },
    /// Revoke a token by its id
    Revoke { token_id: String },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Register an account
    Add { account: String },
    /// Revoke all of an account's tokens and remove it
    Remove { account: String },
    /// List registered accounts
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    // Parsing runs before configuration is loaded, so it must not need any.
    #[test]
    fn help_needs_no_configuration() {
        let err = Cli::try_parse_from(["vigil", "--help"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn token_create_accepts_rotate() {
        let cli = Cli::try_parse_from(["vigil", "token", "create", "alice", "--rotate"]).unwrap();
        match cli.command {
            Some(Commands::Token {
                command: TokenCommands::Create { account, rotate },
            }) => {
                assert_eq!(account, "alice");
                assert!(rotate);
            }
            _ => panic!("expected token create"),
        }
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["vigil"]).unwrap();
        assert!(cli.command.is_none());
    }
}
