//! Documented constants for the preference memory core
//!
//! This module contains all tunable parameters with justification for their
//! values. Centralizing constants prevents magic numbers and makes tuning
//! easier.

// =============================================================================
// CONFIDENCE MODEL CONSTANTS
// Asymmetric reinforcement: rejections move confidence faster than
// acceptances, so a few explicit "no"s outweigh passive confirmations.
// =============================================================================

/// Upper bound for preference confidence (0.95, never 1.0)
///
/// Confidence is belief strength, and the system never reaches certainty:
/// a preference learned from conversation can always turn out to be stale
/// or misread. Capping below 1.0 keeps every record revisable by a bounded
/// number of rejections.
pub const CONFIDENCE_MAX: f32 = 0.95;

/// Lower bound for preference confidence
///
/// A record at or below this value is deleted rather than stored. Keeping
/// zero-confidence rows around would only clutter retrieval and conflict
/// scans with records the user has already disowned.
pub const CONFIDENCE_MIN: f32 = 0.0;

/// Confidence gain when the user accepts a suggestion (+0.1)
///
/// Ten consecutive acceptances take a fresh 0.5-confidence record to the cap.
pub const ACCEPT_DELTA: f32 = 0.1;

/// Confidence loss when the user rejects a suggestion (−0.15)
///
/// Asymmetric with ACCEPT_DELTA (1.5:1) because acting on a wrong preference
/// is more costly than under-using a right one. Seven rejections erase a
/// fully reinforced record.
pub const REJECT_DELTA: f32 = 0.15;

/// Default confidence for a freshly extracted preference when the extractor
/// does not report one.
pub const DEFAULT_EXTRACTION_CONFIDENCE: f32 = 0.5;

// =============================================================================
// CACHE CONSTANTS
// TTLs mirror the access pattern: preference lists are read on every turn,
// context retrievals are bursty around a single conversation topic.
// =============================================================================

/// TTL for cached preference lists (300 s)
///
/// Short enough that a stale list self-heals within minutes even if an
/// invalidation is missed, long enough to absorb the per-turn read load.
pub const PREFERENCES_TTL_SECS: u64 = 300;

/// TTL for cached context-retrieval results (600 s)
///
/// Context rarely shifts within ten minutes of conversation; the key embeds
/// a hash of the factors, so a genuine context change misses naturally.
pub const CONTEXT_TTL_SECS: u64 = 600;

/// Number of hex characters of the sha256 factor digest kept in context
/// cache keys. 16 hex chars = 64 bits, collision-safe at cache scale.
pub const CONTEXT_KEY_HASH_LEN: usize = 16;

// =============================================================================
// EXTERNAL CALL RETRY POLICY
// =============================================================================

/// Maximum attempts for LLM completion/embedding calls
pub const LLM_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff between retry attempts (doubles each attempt)
pub const LLM_BACKOFF_INITIAL_MS: u64 = 500;

/// Ceiling for a single backoff sleep
pub const LLM_BACKOFF_MAX_MS: u64 = 4_000;

// =============================================================================
// RETRIEVAL DEFAULTS
// =============================================================================

/// Default number of similar situations returned by a context search
pub const DEFAULT_TOP_K: usize = 5;

/// Default minimum similarity score for situation retrieval
///
/// 0.7 keeps only situations whose context genuinely resembles the query;
/// below that the linked preferences tend to be noise.
pub const DEFAULT_MIN_SCORE: f32 = 0.7;

/// Default minimum confidence for preference listing
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// Default minimum confidence for the get_context tool (stricter than plain
/// listing: surfaced context should be trustworthy without follow-up)
pub const CONTEXT_MIN_CONFIDENCE: f32 = 0.5;
