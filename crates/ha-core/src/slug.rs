//! Slug generation for names used inside entity ids

/// Turn a free-form name into an object-id-safe slug
///
/// Lowercases ASCII, maps every run of other characters to a single `_` and
/// trims underscores from both ends. `"Living Room #2"` becomes `living_room_2`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Kitchen"), "kitchen");
        assert_eq!(slugify("Living Room #2"), "living_room_2");
        assert_eq!(slugify("  --Master   Bedroom-- "), "master_bedroom");
        assert_eq!(slugify("already_slugged"), "already_slugged");
        assert_eq!(slugify(""), "");
    }
}
