//! Block-list line translation and PAC assembly.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use tracing::warn;

/// JS character class terminating a domain in Adblock `^` position.
const SEPARATOR_CLASS: &str = "(?:[^\\w\\-.%\u{0080}-\u{FFFF}]|$)";
/// JS prefix matching a URL scheme plus optional sub-domains, the meaning of
/// a leading `||` in Adblock syntax.
const DOMAIN_PREFIX: &str = "^[\\w\\-]+:\\/+(?!\\/)(?:[^\\/]+\\.)?";

static RE_STAR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+").unwrap());
static RE_SEPARATOR_AT_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\^\|$").unwrap());
static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").unwrap());
static RE_ESCAPED_CARET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\^").unwrap());
static RE_LEADING_DOMAIN_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\\|\\\|").unwrap());
static RE_LEADING_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\\|").unwrap());
static RE_TRAILING_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\|$").unwrap());
static RE_LEADING_WILDCARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\.\*)").unwrap());
static RE_TRAILING_WILDCARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\.\*)$").unwrap());

/// Translate one Adblock pattern into a JS regex body.
///
/// The rewrite order matters: wildcards collapse before escaping, anchors
/// rewrite after, and a redundant leading/trailing `.*` is stripped last.
pub fn translate_rule(pattern: &str) -> String {
    let s = RE_STAR_RUNS.replace_all(pattern, "*");
    // A trailing `^|` is just a separator at the end of the address.
    let s = RE_SEPARATOR_AT_END.replace(&s, "^");
    let s = RE_NON_WORD.replace_all(&s, |caps: &regex::Captures<'_>| format!("\\{}", &caps[0]));
    let s = s.replace("\\*", ".*");
    let s = RE_ESCAPED_CARET.replace_all(&s, NoExpand(SEPARATOR_CLASS));
    let s = RE_LEADING_DOMAIN_ANCHOR.replace(&s, NoExpand(DOMAIN_PREFIX));
    let s = RE_LEADING_ANCHOR.replace(&s, NoExpand("^"));
    let s = RE_TRAILING_ANCHOR.replace(&s, NoExpand("$"));
    let s = RE_LEADING_WILDCARD.replace(&s, "");
    let s = RE_TRAILING_WILDCARD.replace(&s, "");
    s.into_owned()
}

/// Generate the PAC script from a raw block-list.
///
/// `content` is the decoded list text; `user_rules` is appended after a
/// newline before compilation. The first line of `content` is the list
/// banner and is skipped, as are blanks and `!` comments.
pub fn generate_pac(
    source_url: &str,
    last_modified: &str,
    content: &str,
    user_rules: Option<&str>,
    pac_proxy: &str,
) -> String {
    let mut text = content.to_string();
    if let Some(user) = user_rules {
        text.push('\n');
        text.push_str(user);
    }

    let mut exceptions: Vec<String> = Vec::new();
    let mut proxies: Vec<String> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        if index == 0 {
            continue;
        }
        let line = raw.trim();
        if line.is_empty() || line.starts_with('!') {
            continue;
        }

        let (pattern, var, bucket) = match line.strip_prefix("@@") {
            Some(rest) => (rest, "DEFAULT", &mut exceptions),
            None => (line, "PROXY", &mut proxies),
        };

        let body = if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            pattern[1..pattern.len() - 1].to_string()
        } else {
            let body = translate_rule(pattern);
            if body.is_empty() {
                warn!(rule = %line, "block-list rule matches every URL");
            }
            body
        };
        bucket.push(format!("if(/{body}/i.test(url)) return {var};"));
    }

    // Exceptions first, newest-in-source at the top, so DIRECT always wins.
    let rules: Vec<&str> = exceptions
        .iter()
        .rev()
        .chain(proxies.iter())
        .map(String::as_str)
        .collect();
    let rule_code = rules.join("\r\n\t");

    format!(
        "/*\n\
         \x20* Proxy Auto-Config file generated by autoproxy2pac\n\
         \x20*  Rule source: {source_url}\n\
         \x20*  Last update: {last_modified}\n\
         \x20*/\n\
         function FindProxyForURL(url, host) {{\n\
         \tvar PROXY = \"PROXY {pac_proxy}\";\n\
         \tvar DEFAULT = \"DIRECT\";\n\
         \t//-- AUTO-GENERATED RULES, DO NOT MODIFY!\n\
         \t{rule_code}\n\
         \t//-- END OF AUTO-GENERATED RULES\n\
         \treturn DEFAULT;\n\
         }}\n"
    )
}
