//! Protocol-wide constants shared by the producer and the viewer host.

/// Shared-memory name prefix for segments destined for a napari viewer.
pub const NAPARI_SHM_PREFIX: &str = "napari_";

/// Shared-memory name prefix for segments destined for a Fiji/ImageJ viewer.
pub const FIJI_SHM_PREFIX: &str = "fiji_";

/// Upper bound for a single wire frame.
///
/// Batch messages carry metadata and inline ROI/point payloads only; pixel
/// data travels through shared memory. Anything larger than this is treated
/// as a corrupt length prefix, the same way a ring reader resynchronizes on
/// a bogus frame header.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Environment variable overriding the location of `config.toml`.
pub const CONFIG_ENV_VAR: &str = "PLATESTREAM_CONFIG";

/// When set (to any value), viewer adapters are replaced by inert
/// placeholders. Used by subprocess runners that must not pull GUI or
/// GPU-adjacent stacks into the worker process.
pub const INERT_VIEWERS_ENV_VAR: &str = "PLATESTREAM_INERT_VIEWERS";

/// Delay after a publisher connect before the first frame is written.
/// Freshly accepted connections may not be consuming yet; there are no
/// connect retries, so this is the only accommodation made.
pub const DEFAULT_CONNECT_READY_DELAY_MS: u64 = 100;

/// Default deadline for a request/reply send, milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default bound of the publisher outbound queue (high-water mark).
pub const DEFAULT_HIGH_WATER_MARK: usize = 10_000;

/// Default receiver debounce delay, milliseconds.
pub const DEFAULT_DEBOUNCE_DELAY_MS: u64 = 500;

/// Default cap on total debounce wait, milliseconds.
pub const DEFAULT_MAX_DEBOUNCE_WAIT_MS: u64 = 2_000;
