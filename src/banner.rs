//! Startup banner

use crate::voice::SttProvider;

const SKULL: &str = r"
      .-''''''-.
    .'          '.
   /   O      O   \
  :           `    :
  |                |
  :    .------.    :
   \  '        '  /
    '.          .'
      '-......-'
";

/// Banner shown when the interactive loop starts
#[must_use]
pub fn render(model: &str, stt: SttProvider, stream: bool) -> String {
    let mode = if stream { "streaming" } else { "blocking" };
    format!(
        "{SKULL}\n  B O N E G P T   v{}\n  model: {model}  |  stt: {stt}  |  replies: {mode}\n  say \"clear\" to forget, \"quit\" to leave\n",
        env!("CARGO_PKG_VERSION"),
    )
}
