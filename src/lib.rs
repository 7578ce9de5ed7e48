//! try-push - applies Phabricator patch stacks to a Mercurial tree and pushes them to try.
//!
//! This library provides the worker that consumes queued diffs, the Mercurial
//! and Conduit layers it drives, and the supporting configuration and
//! credential handling.

pub mod config;
pub mod credential;
pub mod hg;
pub mod phabricator;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_utils;
