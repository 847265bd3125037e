use std::borrow::Cow;
use std::fmt;

/// Whether `\G` can match at the position we are searching from.
///
/// Onig treats `\G` as "the start of the search", which is true at every position
/// we search from. Grammars mean "where the last begin match ended" so we only
/// enable it at that position.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    G,
    None,
}

impl AnchorActive {
    pub fn new(anchor_position: Option<usize>, current_pos: usize) -> Self {
        if anchor_position == Some(current_pos) {
            AnchorActive::G
        } else {
            AnchorActive::None
        }
    }
}

/// This follows vscode-textmate and replaces `\G` with something that is very unlikely
/// to match
pub(crate) fn disable_g_anchor(pat: &str) -> Cow<'_, str> {
    if pat.contains("\\G") {
        Cow::Owned(pat.replace("\\G", "\u{FFFF}"))
    } else {
        Cow::Borrowed(pat)
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::G => "allow_G=true",
            AnchorActive::None => "allow_G=false",
        };
        f.write_str(s)
    }
}
