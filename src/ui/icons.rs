//! Shared UI icons.
//!
//! Each icon has a plain-text fallback for terminals without emoji support.

use console::Emoji;

// Outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[+]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[-]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Flow
pub static BUTTON: Emoji<'_, '_> = Emoji("🔘 ", "(o)");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static PIVOT: Emoji<'_, '_> = Emoji("🔄 ", "[~]");
pub static UPLOAD: Emoji<'_, '_> = Emoji("📤 ", "[^]");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
