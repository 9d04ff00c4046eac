//! Shared UI icons.
//!
//! Emoji constants used across the UI for consistent visual styling, with
//! plain-text fallbacks for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static DEFER: Emoji<'_, '_> = Emoji("⏸️  ", "[DEFER]");
pub static COMMIT: Emoji<'_, '_> = Emoji("📦 ", "[COMMIT]");
pub static ROLLBACK: Emoji<'_, '_> = Emoji("↩️  ", "[ROLLBACK]");
pub static LOOP: Emoji<'_, '_> = Emoji("🔄 ", "[LOOP]");
