//! Text helpers available to scripts: sections and regexes.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use regex::Regex;
use rhai::{Array, Dynamic, Engine, EvalAltResult};

use super::request::FatalSlot;

/// Compiled regexes shared by one script host, oldest evicted first.
#[derive(Debug, Clone)]
pub(crate) struct RegexCache {
    capacity: usize,
    entries: Arc<Mutex<IndexMap<String, Regex>>>,
}

impl RegexCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Get or compile a pattern.
    pub(crate) fn get(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Ok(entries) = self.entries.lock() {
            if let Some(re) = entries.get(pattern) {
                return Ok(re.clone());
            }
        }
        let re = Regex::new(pattern)?;
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity {
                entries.shift_remove_index(0);
            }
            entries.insert(pattern.to_string(), re.clone());
        }
        Ok(re)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// A block of text introduced by a matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Capture groups of the matching line, group 0 first.
    pub captures: Vec<Option<String>>,

    /// Lines following the matching line, up to the next match.
    pub config: String,
}

/// Split `text` into blocks, each starting at a line matching `pattern`.
///
/// Lines before the first match are ignored; blank lines are dropped.
pub fn find_sections(text: &str, pattern: &Regex) -> Vec<Section> {
    let mut sections: Vec<(Vec<Option<String>>, Vec<&str>)> = Vec::new();

    for line in text.split(['\r', '\n']).filter(|l| !l.is_empty()) {
        if let Some(caps) = pattern.captures(line) {
            let captures = caps
                .iter()
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect();
            sections.push((captures, Vec::new()));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line);
        }
    }

    sections
        .into_iter()
        .map(|(captures, lines)| Section {
            captures,
            config: lines.join("\n"),
        })
        .collect()
}

pub(crate) fn captures_to_array(captures: &[Option<String>]) -> Array {
    captures
        .iter()
        .map(|c| match c {
            Some(text) => Dynamic::from(text.clone()),
            None => Dynamic::UNIT,
        })
        .collect()
}

fn capture_array(caps: &regex::Captures<'_>) -> Array {
    caps.iter()
        .map(|group| match group {
            Some(m) => Dynamic::from(m.as_str().to_string()),
            None => Dynamic::UNIT,
        })
        .collect()
}

/// Register the `regex_*` functions.
pub(crate) fn register(engine: &mut Engine, cache: RegexCache, fatal: FatalSlot) {
    let compile = move |call: &str, pattern: &str| -> Result<Regex, Box<EvalAltResult>> {
        cache
            .get(pattern)
            .map_err(|e| fatal.invalid(call, format!("invalid pattern '{pattern}': {e}")))
    };
    let compile = Arc::new(compile);

    let c = compile.clone();
    engine.register_fn("regex_test", move |text: &str, pattern: &str| {
        c("regex_test", pattern).map(|re| re.is_match(text))
    });

    let c = compile.clone();
    engine.register_fn(
        "regex_match",
        move |text: &str, pattern: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let re = c("regex_match", pattern)?;
            Ok(match re.captures(text) {
                Some(caps) => Dynamic::from_array(capture_array(&caps)),
                None => Dynamic::UNIT,
            })
        },
    );

    let c = compile.clone();
    engine.register_fn(
        "regex_match_all",
        move |text: &str, pattern: &str| -> Result<Array, Box<EvalAltResult>> {
            let re = c("regex_match_all", pattern)?;
            Ok(re
                .captures_iter(text)
                .map(|caps| Dynamic::from_array(capture_array(&caps)))
                .collect())
        },
    );

    let c = compile.clone();
    engine.register_fn(
        "regex_replace",
        move |text: &str, pattern: &str, replacement: &str| -> Result<String, Box<EvalAltResult>> {
            let re = c("regex_replace", pattern)?;
            Ok(re.replace_all(text, replacement).into_owned())
        },
    );

    let c = compile;
    engine.register_fn(
        "regex_split",
        move |text: &str, pattern: &str| -> Result<Array, Box<EvalAltResult>> {
            let re = c("regex_split", pattern)?;
            Ok(re.split(text).map(|part| Dynamic::from(part.to_string())).collect())
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: &str = "\
version 15.2
!
interface GigabitEthernet0/1
 description uplink
 ip address 10.0.0.1 255.255.255.0
!
interface GigabitEthernet0/2
 shutdown
!
end
";

    #[test]
    fn test_find_sections() {
        let pattern = Regex::new(r"^interface (\S+)").unwrap();
        let sections = find_sections(RUNNING, &pattern);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].captures[1].as_deref(), Some("GigabitEthernet0/1"));
        assert_eq!(
            sections[0].config,
            " description uplink\n ip address 10.0.0.1 255.255.255.0\n!"
        );
        assert_eq!(sections[1].captures[0].as_deref(), Some("interface GigabitEthernet0/2"));
        assert_eq!(sections[1].config, " shutdown\n!\nend");
    }

    #[test]
    fn test_find_sections_no_match() {
        let pattern = Regex::new(r"^router bgp").unwrap();
        assert!(find_sections(RUNNING, &pattern).is_empty());
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let cache = RegexCache::new(2);
        cache.get("a+").unwrap();
        cache.get("b+").unwrap();
        cache.get("c+").unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get("(").is_err());
    }

    #[test]
    fn test_regex_functions() {
        let mut engine = Engine::new();
        register(&mut engine, RegexCache::new(8), FatalSlot::default());

        assert!(engine.eval::<bool>(r#"regex_test("Version 15.2", `Version \d+`)"#).unwrap());
        let version: String = engine
            .eval(r#"regex_match("Cisco IOS Software, Version 15.2(4)M", `Version (\S+)`)[1]"#)
            .unwrap();
        assert_eq!(version, "15.2(4)M");
        let count: i64 = engine
            .eval(r#"regex_match_all("a1 b2 c3", `([a-z])(\d)`).len()"#)
            .unwrap();
        assert_eq!(count, 3);
        let replaced: String = engine.eval(r#"regex_replace("a-b-c", "-", "+")"#).unwrap();
        assert_eq!(replaced, "a+b+c");
        let parts: i64 = engine.eval(r#"regex_split("a, b,c", `,\s*`).len()"#).unwrap();
        assert_eq!(parts, 3);
        assert!(engine.eval::<Dynamic>(r#"regex_match("abc", "x")"#).unwrap().is_unit());
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let mut engine = Engine::new();
        let fatal = FatalSlot::default();
        register(&mut engine, RegexCache::new(8), fatal.clone());

        let err = engine
            .eval::<Dynamic>(r#"try { regex_test("x", "(") } catch { true }"#)
            .unwrap_err();
        assert!(!err.is_catchable());
        assert!(fatal.is_set());
    }
}
