//! Compiled classification rules, in the priority order [`super::classify`]
//! applies them. The vocabularies carry both the tool's English tokens and
//! their Japanese console equivalents, since robocopy localizes its output.

use once_cell::sync::Lazy;
use regex::Regex;

/// Structured file-operation row: optional status token, size field, tab,
/// path. The status vocabulary is closed; anything else falls through to the
/// whole-line heuristics.
pub static FILE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(New File|Newer|Older|Same|Changed|Modified|\*EXTRA File|\*EXTRA Dir|New Dir|Extra Dir|MISMATCH|FAILED|新しいファイル|新しいディレクトリ|新しい|古い|同じ|変更済み|更新済み)?\s+(\d+(?:\.\d+\s*[kmgt])?)\t(.+)$",
    )
    .expect("valid file-line pattern")
});

/// Error markers: explicit ERROR/FAILED tags, timestamped error-log lines,
/// and known OS failure phrases, English and Japanese.
pub static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        (ERROR[\s:]|FAILED|エラー|^\s*\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2}\s+ERROR
        |Retry\s+limit\s+exceeded|The\s+process\s+cannot|Access\s+is\s+denied
        |Insufficient\s+disk\s+space|filename\s+or\s+extension\s+is\s+too\s+long
        |Sharing\s+violation|cannot\s+find\s+the\s+path|cannot\s+find\s+the\s+file
        |network\s+name\s+cannot\s+be\s+found|Logon\s+failure
        |Cannot\s+create\s+a\s+file\s+when\s+that\s+file\s+already\s+exists
        |ファイルが見つかりません|アクセスが拒否|パスが見つかりません
        |使用中のファイル|ネットワーク\x20パスが見つかりません
        |ディスクに空き領域がありません|ファイル名または拡張子が長すぎます
        |共有違反|指定されたパスが見つかりません|指定されたファイルが見つかりません)",
    )
    .expect("valid error pattern")
});

pub static COPYING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(New File|New Dir|Newer|新しいファイル|新しいディレクトリ|新しい)")
        .expect("valid copying pattern")
});

pub static SKIPPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(same|older|skip|同じ|古い|スキップ)").expect("valid skipped pattern")
});

pub static EXTRA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\*EXTRA").expect("valid extra pattern"));

/// Summary-table headers of the tool's final report.
pub static SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(Dirs|Files|Bytes|Times|Speed|ディレクトリ|ファイル|バイト|時刻|速度)\s*:")
        .expect("valid summary pattern")
});

/// A run of five or more dashes, ASCII or box-drawing.
pub static SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:-{5,}|─{5,})").expect("valid separator pattern"));

/// Wrapper-generated status lines carry a `[HH:MM:SS]` stamp.
pub static INFO_STAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\d{2}:\d{2}:\d{2}\]").expect("valid stamp pattern"));
