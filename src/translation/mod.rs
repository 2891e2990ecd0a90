/*!
 * Translation layer: prompt assembly, batch dispatch, retry policy.
 *
 * Providers only know how to complete one chat exchange. Everything that
 * makes translation reliable lives here: the numbered-list contract,
 * response parsing, count-mismatch halving, backoff, and health
 * classification.
 */

pub mod batch;
pub mod prompts;

pub use batch::{BatchError, BatchTranslator, HealthStatus};
