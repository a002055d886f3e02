//! Status emojis with plain-text fallbacks for terminals without unicode.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSED]");
pub static RECYCLE: Emoji<'_, '_> = Emoji("♻️  ", "[REUSED]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");
