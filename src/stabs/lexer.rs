//! C2: tokenizes one null-terminated STABS value string.
//!
//! Implements the three documented edge cases from spec §4.2: template
//! argument lists containing unescaped `:`, character literals containing
//! bracket/quote characters, and embedded-null truncation.

use super::tree::TypeNumber;

/// Finds the first top-level `:` in `s` -- the terminator between a symbol's
/// name and its descriptor, or between a type's name and its body. Nesting
/// of `<`...`>` is tracked so a template argument list such as
/// `Foo<Bar::Baz>` does not terminate early at the `::`'s colons; bracket
/// counting is suspended while scanning inside a `'...'` character literal,
/// so a literal like `'<'` does not perturb the nesting depth.
pub fn find_tag_terminator(s: &str) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut in_char_literal = false;
    for (i, c) in s.char_indices() {
        if in_char_literal {
            if c == '\'' {
                in_char_literal = false;
            }
            continue;
        }
        match c {
            '\'' => in_char_literal = true,
            '<' => depth += 1,
            '>' => depth -= 1,
            ':' if depth <= 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Splits `name:rest` at the first top-level colon (see
/// [`find_tag_terminator`]). Returns `None` if there is no terminator, which
/// happens when an embedded null byte truncated the stab string before the
/// descriptor (spec §4.2 edge case iii).
pub fn split_name(s: &str) -> Option<(&str, &str)> {
    let idx = find_tag_terminator(s)?;
    Some((&s[..idx], &s[idx + 1..]))
}

/// Parses a STABS type number: either a plain `N` or a cross-file `(file,N)`.
/// Returns the parsed number and the unconsumed remainder of `s`.
pub fn parse_type_number(s: &str) -> Option<(TypeNumber, &str)> {
    if let Some(rest) = s.strip_prefix('(') {
        let comma = rest.find(',')?;
        let file: i32 = rest[..comma].parse().ok()?;
        let after_comma = &rest[comma + 1..];
        let close = after_comma.find(')')?;
        let number: i32 = after_comma[..close].parse().ok()?;
        return Some((
            TypeNumber {
                file: Some(file),
                number,
            },
            &after_comma[close + 1..],
        ));
    }

    let digits_end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && c == '-'))
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    if digits_end == 0 {
        return None;
    }
    let number: i32 = s[..digits_end].parse().ok()?;
    Some((TypeNumber::same_file(number), &s[digits_end..]))
}

/// Parses a signed decimal integer from the start of `s` (used for range
/// bounds, enum constant values, struct/field sizes and offsets).
pub fn parse_signed(s: &str) -> Option<(i64, &str)> {
    let end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && c == '-'))
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    if end == 0 {
        return None;
    }
    let value: i64 = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_colon_is_not_terminator() {
        let s = "ColonInTypeName<Namespace::A>:t1=xsA:";
        let (name, rest) = split_name(s).unwrap();
        assert_eq!(name, "ColonInTypeName<Namespace::A>");
        assert_eq!(rest, "t1=xsA:");
    }

    #[test]
    fn char_literal_brackets_do_not_perturb_nesting() {
        let s = "LessThanCharacterLiteralInTypeName<'<'>:t2=xsA:";
        let (name, rest) = split_name(s).unwrap();
        assert_eq!(name, "LessThanCharacterLiteralInTypeName<'<'>");
        assert_eq!(rest, "t2=xsA:");
    }

    #[test]
    fn truncated_string_has_no_terminator() {
        let s = "ThisStabWillGetTruncated<";
        assert!(split_name(s).is_none());
    }

    #[test]
    fn parses_plain_and_cross_file_type_numbers() {
        assert_eq!(
            parse_type_number("42rest").unwrap(),
            (TypeNumber::same_file(42), "rest")
        );
        let (num, rest) = parse_type_number("(3,7)rest").unwrap();
        assert_eq!(num, TypeNumber { file: Some(3), number: 7 });
        assert_eq!(rest, "rest");
    }
}
