/// Parses plugins.txt / loadorder.txt / Mod Organizer style text into the ordered list of
/// enabled entries. `*` and `+` mark enabled lines, `-` marks disabled ones, `#` starts a
/// comment. Duplicate entries keep their first position.
pub fn parse_mod_list(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('-') {
            continue;
        }
        let name = line.trim_start_matches(['*', '+']).trim();
        if name.is_empty() {
            continue;
        }
        if out.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

pub fn is_plugin_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".esp") || lower.ends_with(".esm") || lower.ends_with(".esl")
}
