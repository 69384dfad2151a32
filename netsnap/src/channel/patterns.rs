//! Pattern compilation and output cleanup helpers.

use regex::{Regex, RegexBuilder};

/// Compile a descriptor pattern.
///
/// Patterns are multi-line: `^` and `$` match at line boundaries, so a
/// prompt pattern such as `^router#$` matches the last line of the buffer.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).multi_line(true).build()
}

/// Pin the first capturing group of a prompt pattern to a literal.
///
/// `^([A-Za-z0-9]+#)$` pinned to `core-1#` becomes `^(core\-1#)$`.
/// Non-capturing and flag groups (`(?...)`) are skipped. Returns the
/// pattern unchanged when it has no capturing group.
pub fn pin_prompt(pattern: &str, literal: &str) -> String {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    let mut in_class = false;
    let mut open: Option<usize> = None;
    let mut depth = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            b'(' if !in_class => {
                if open.is_some() {
                    depth += 1;
                } else if bytes.get(i + 1) != Some(&b'?') {
                    open = Some(i);
                    depth = 0;
                }
            }
            b')' if !in_class => {
                if let Some(start) = open {
                    if depth == 0 {
                        return format!(
                            "{}({}){}",
                            &pattern[..start],
                            regex::escape(literal),
                            &pattern[i + 1..]
                        );
                    }
                    depth -= 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    pattern.to_string()
}

/// Remove the echoed command from the head of the output.
///
/// The echo is either the command itself at the very start of the output,
/// or a first line whose trimmed text equals the command.
pub fn strip_echo(output: &str, command: &str) -> String {
    let command = command.trim_end_matches(['\r', '\n']);
    if command.is_empty() {
        return output.trim_start_matches(['\r', '\n']).to_string();
    }

    if let Some(rest) = output.strip_prefix(command) {
        return rest.trim_start_matches([' ', '\r', '\n']).to_string();
    }

    match output.split_once('\n') {
        Some((first, rest)) if first.trim() == command.trim() => rest.to_string(),
        None if output.trim() == command.trim() => String::new(),
        _ => output.to_string(),
    }
}

/// Remove a prompt-prefixed echo (`router(config)#hostname foo`) from the
/// first line, when the line ends with the command.
pub fn strip_prompted_echo(output: &str, command: &str) -> String {
    let command = command.trim();
    if command.is_empty() {
        return output.to_string();
    }
    match output.split_once('\n') {
        Some((first, rest)) if first.trim_end().ends_with(command) => rest.to_string(),
        None if output.trim_end().ends_with(command) => String::new(),
        _ => output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_multiline() {
        let re = compile_pattern(r"^[a-z]+#$").unwrap();
        assert!(re.is_match("output line\nrouter#"));
        assert!(!re.is_match("router# more"));
    }

    #[test]
    fn test_pin_prompt() {
        assert_eq!(
            pin_prompt(r"^([A-Za-z\-_0-9\.\/]+#)$", "core-1#"),
            r"^(core\-1\#)$"
        );
    }

    #[test]
    fn test_pin_prompt_skips_non_capturing() {
        assert_eq!(
            pin_prompt(r"^(?:\r)?([a-z]+(?:\(cfg\))?#)$", "r1(cfg)#"),
            r"^(?:\r)?(r1\(cfg\)\#)$"
        );
        assert_eq!(pin_prompt(r"^[a-z]+>$", "r1>"), r"^[a-z]+>$");
        assert_eq!(pin_prompt(r"^[(]x\)([a-z]+)$", "ab"), r"^[(]x\)(ab)$");
    }

    #[test]
    fn test_strip_echo_prefix() {
        assert_eq!(strip_echo("show version\nIOS 15.2\n", "show version"), "IOS 15.2\n");
        assert_eq!(strip_echo("show clock\r\n10:00\n", "show clock\n"), "10:00\n");
    }

    #[test]
    fn test_strip_echo_first_line() {
        assert_eq!(strip_echo("  show run  \nhostname r1\n", "show run"), "hostname r1\n");
        assert_eq!(strip_echo("hostname r1\n", "show run"), "hostname r1\n");
    }

    #[test]
    fn test_strip_prompted_echo() {
        assert_eq!(
            strip_prompted_echo("r1(config)#hostname r2\nr2(config)#", "hostname r2"),
            "r2(config)#"
        );
    }
}
