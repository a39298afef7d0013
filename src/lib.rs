//! Sharding router core: rule model, shard functions, predicate
//! evaluator, and statement rewriter for a SQL sharding proxy.
//!
//! Given a parsed [`ast::Statement`] and a schema's [`router::Router`],
//! [`plan::build_plan`] produces a [`plan::Plan`] — a mapping from each
//! participating backend node to the rewritten SQL strings to run
//! there — or a well-defined [`error::RouterError`]. The SQL parser,
//! wire protocol front-end, connection pool, and result-set merging
//! all live upstream or downstream of this crate (`spec.md` §1).

pub mod ast;
pub mod config;
pub mod error;
pub mod plan;
pub mod router;
pub mod shard;

use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Set up the logger so `debug!`/`trace!` output actually appears.
///
/// Uses `try_init` and ignores errors so it's safe to call from
/// multiple integration tests in the same process.
pub fn logger() {
    let format = fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_file(false);
    #[cfg(not(debug_assertions))]
    let format = format.with_target(false);

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry().with(format).with(filter).try_init();
}
