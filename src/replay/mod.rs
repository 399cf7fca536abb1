//! Read-only review of recorded rounds: manual stepping, timed autoplay and
//! narrated (guided) replay.

mod cursor;
mod narration;
mod session;

pub use cursor::ReplayCursor;
pub use narration::{instruction_sentence, narrate, LogNarrator, Narrator, NARRATION_LOCALE};
pub use session::{ReplaySession, GUIDED_INTERVAL};
