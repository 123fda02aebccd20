use clap::{Parser, Subcommand};

/// A shared board on which players spend 100 credits to vote for or against characters.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON file describing the board and its store.
    /// See the documentation of the credit_ledger crate for the format.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (memory, json or sqlite) The store holding the board. Setting this option overrides the
    /// provider that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub store: Option<String>,

    /// (file path) The file of the json or sqlite store. Setting this option overrides the
    /// path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub path: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Lists the players with their remaining credits.
    Players,
    /// Registers a new player.
    AddPlayer {
        #[clap(value_parser)]
        name: String,
    },
    /// Registers a new character.
    AddCharacter {
        #[clap(value_parser)]
        name: String,
    },
    /// Moves credits of a player for or against a character.
    Vote {
        #[clap(long, value_parser)]
        player: String,
        #[clap(long, value_parser)]
        character: String,
        /// Positive to vote for, negative to vote against or to take credits back.
        #[clap(long, value_parser, allow_hyphen_values = true)]
        delta: i64,
    },
    /// Ranks the characters by score.
    Ranking {
        /// Ranks by the weights of one player instead of the group total.
        #[clap(long, takes_value = false, requires = "player")]
        own: bool,
        #[clap(long, value_parser)]
        player: Option<String>,
    },
    /// The favorite and least favorite character of each player.
    Favorites,
    /// The most recent allocations recorded by the store.
    Log {
        #[clap(long, value_parser)]
        limit: Option<usize>,
    },
    /// Clears the votes of every player.
    Reset,
    /// Takes a character out of every player's votes, refunding the credits.
    Withdraw {
        #[clap(long, value_parser)]
        character: String,
    },
    /// (file path or 'stdout') Writes a JSON summary of the board.
    Summary {
        #[clap(short, long, value_parser, default_value = "stdout")]
        out: String,
    },
}
