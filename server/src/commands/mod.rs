//! Bot Commands
//!
//! Access gate in front of the bot's slash commands, plus the two commands
//! that change access state: `/setmod` and `/register`.

mod gate;

pub use gate::{
    command_access, CommandAccess, CommandError, CommandGate, CommandInvocation,
    MemberRegistration,
};
