use b2bua_types::DomainError;
use regex::Regex;

/// One compiled `/pattern/replacement/flags` rule.
struct Rule {
    pattern: Regex,
    replacement: String,
    global: bool,
}

/// A chain of `sed`-style substitution rules, e.g.
/// `/^0/+1/;s/^011/+/`. Compiled once at config-load time (`parse`), then
/// applied to every `cld`/`cli` string that flows through
/// `static_tr_in`/`static_tr_out`.
///
/// Grammar (the exact subset the original's `re_replace` implements, no
/// more): the string is split on `/`, consumed four fields at a time
/// (an empty leading field from a leading `/` is allowed and ignored):
/// `op` (ignored — always an implicit substitution), `pattern`,
/// `replacement`, `flags`. `flags` may contain `g` for "replace all
/// occurrences" instead of just the first; any trailing `;`-separated
/// text after the flag starts the next rule in the chain. A `#` starts a
/// trailing comment on the whole input string and is stripped first.
pub struct TranslationChain {
    rules: Vec<Rule>,
}

impl TranslationChain {
    pub fn parse(spec: &str) -> Result<Self, DomainError> {
        let mut fields: Vec<&str> = spec.split('/').collect();
        if !fields.is_empty() && fields[0].is_empty() {
            fields.remove(0);
        }
        let mut rules = Vec::new();
        while fields.len() >= 3 {
            let pattern = fields[0];
            let replacement = fields[1];
            let flags = fields.get(2).copied().unwrap_or("");
            let global = flags.chars().next().map(|c| c.to_ascii_lowercase() == 'g').unwrap_or(false);
            let regex = Regex::new(pattern).map_err(|e| {
                DomainError::ConfigError(format!("bad translation pattern {pattern:?}: {e}"))
            })?;
            rules.push(Rule {
                pattern: regex,
                replacement: replacement.to_string(),
                global,
            });
            fields.drain(0..3);
        }
        Ok(Self { rules })
    }

    /// Apply every rule in order to `input`, stripping a trailing
    /// `#`-comment first (the original strips comments from the *input*
    /// string being translated, not from the rule spec).
    pub fn apply(&self, input: &str) -> String {
        let mut s = input.split('#').next().unwrap_or("").to_string();
        for rule in &self.rules {
            s = if rule.global {
                rule.pattern.replace_all(&s, rule.replacement.as_str()).into_owned()
            } else {
                rule.pattern.replacen(&s, 1, rule.replacement.as_str()).into_owned()
            };
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rule_replaces_first_match_by_default() {
        let chain = TranslationChain::parse("/^1/+1/").unwrap();
        assert_eq!(chain.apply("18005551212"), "+18005551212");
    }

    #[test]
    fn g_flag_replaces_every_occurrence() {
        let chain = TranslationChain::parse("/0/9/g").unwrap();
        assert_eq!(chain.apply("1020304"), "1929394");
    }

    #[test]
    fn without_g_flag_only_first_occurrence_changes() {
        let chain = TranslationChain::parse("/0/9/").unwrap();
        assert_eq!(chain.apply("1020304"), "1920304");
    }

    #[test]
    fn chained_rules_apply_in_order() {
        let chain = TranslationChain::parse("/^1/2/;/^2/3/").unwrap();
        assert_eq!(chain.apply("100"), "300");
    }

    #[test]
    fn trailing_comment_in_input_is_stripped_before_translation() {
        let chain = TranslationChain::parse("/^1/+1/").unwrap();
        assert_eq!(chain.apply("18005551212#toll-free"), "+18005551212");
    }

    #[test]
    fn empty_spec_is_the_identity_transform() {
        let chain = TranslationChain::parse("").unwrap();
        assert_eq!(chain.apply("18005551212"), "18005551212");
    }
}
