//! Data item naming for outbound events.

use smol_str::SmolStr;

/// Converts a CamelCase action name into the snake_case data item name the
/// agent uses for it, e.g. `MaterialLoad` becomes `material_load`. An
/// uppercase run ends one capital early when a lowercase letter follows, so
/// `CNCMaterialLoad` becomes `cnc_material_load`.
#[must_use]
pub fn data_item_name(action: &str) -> SmolStr {
    let chars: Vec<char> = action.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut prev: Option<char> = None;
    for (index, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            words.push(String::new());
            prev = None;
            continue;
        }
        let next_is_lower = chars
            .get(index + 1)
            .is_some_and(char::is_ascii_lowercase);
        let starts_word = ch.is_ascii_uppercase()
            && prev.is_some_and(|prev| !prev.is_ascii_uppercase() || next_is_lower);
        match words.last_mut() {
            Some(word) if !starts_word => word.push(ch.to_ascii_lowercase()),
            _ => words.push(ch.to_ascii_lowercase().to_string()),
        }
        prev = Some(ch);
    }
    let joined = words
        .into_iter()
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    SmolStr::new(joined)
}
