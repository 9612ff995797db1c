//! The configuration for the scheduler, given from environment variables and lazy
//! initialized when needed.

use once_cell::race::OnceNonZeroUsize;
use std::num::NonZeroUsize;
use std::{env, thread};


/// Return the number of storage worker threads to spawn.
///
/// Defaults to `max(2, available parallelism)`, override with `TILEWORLD_WORKERS=n`.
pub fn worker_count() -> usize {
    static ENV: OnceNonZeroUsize = OnceNonZeroUsize::new();
    ENV.get_or_init(|| {
        env::var("TILEWORLD_WORKERS").ok()
            .and_then(|raw| raw.parse::<NonZeroUsize>().ok())
            .unwrap_or_else(|| {
                let parallelism = thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1);
                NonZeroUsize::new(parallelism.max(2)).unwrap()
            })
    }).get()
}
