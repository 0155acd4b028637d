//! Pure canonicalization of raw imported field values. Every downstream
//! comparison and key derivation operates on these normalized forms only,
//! so cosmetic differences in casing, punctuation, or whitespace never
//! produce a false negative.

/// Canonical term: human label plus the numeric term code used in identity
/// keys, e.g. `Spring 2026` / `202610`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermInfo {
    pub label: String,
    pub code: String,
}

/// Canonical room/space label: `Cashion 303` becomes building code
/// `CASHION`, space number `0303`, key `CASHION:0303`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceLabel {
    pub building_code: String,
    pub space_number: String,
    pub space_key: String,
    pub display_name: String,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Strip everything but digits. Callers decide how many digits constitute
/// a usable signal (10 for phones, 9 for Baylor IDs).
pub fn normalize_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub fn normalize_phone(raw: &str) -> String {
    normalize_digits(raw)
}

/// `adm1300` / `ADM  1300` / `Adm-1300` all become `ADM 1300`.
pub fn normalize_course_code(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    match cleaned.find(|c: char| c.is_ascii_digit()) {
        Some(split) if split > 0 => format!("{} {}", &cleaned[..split], &cleaned[split..]),
        _ => cleaned,
    }
}

/// Strip a trailing parenthesized CRN from a section label:
/// `01 (39316)` becomes `01`.
pub fn normalize_section(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_uppercase();
    if let Some(open) = trimmed.rfind('(') {
        let inner: &str = trimmed[open..]
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim();
        if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
            return trimmed[..open].trim().to_string();
        }
    }
    trimmed
}

/// Recover a 5-6 digit course reference number from free text (a CRN field
/// or a section label like `01 (39316)`).
pub fn extract_crn(raw: &str) -> Option<String> {
    let mut run = String::new();
    for c in raw.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            run.push(c);
        } else {
            if (5..=6).contains(&run.len()) {
                return Some(run);
            }
            run.clear();
        }
    }
    None
}

const SEASONS: &[(&str, u32)] = &[
    ("spring", 10),
    ("summer", 20),
    ("fall", 30),
    ("autumn", 30),
    ("winter", 40),
];

fn season_name(code: u32) -> Option<&'static str> {
    match code {
        10 => Some("Spring"),
        20 => Some("Summer"),
        30 => Some("Fall"),
        40 => Some("Winter"),
        _ => None,
    }
}

/// Map term spellings (`spring 2026`, `SPRING 2026`, `2026 Spring`, or an
/// already-canonical `202610`) to a canonical label and numeric code.
/// Unrecognized input is no signal, not an error.
pub fn normalize_term(raw: &str) -> Option<TermInfo> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }

    // Already a numeric term code.
    if lowered.len() == 6 && lowered.chars().all(|c| c.is_ascii_digit()) {
        let year = &lowered[..4];
        let season = lowered[4..].parse::<u32>().ok()?;
        let name = season_name(season)?;
        return Some(TermInfo {
            label: format!("{name} {year}"),
            code: lowered,
        });
    }

    // Compact CLSS spelling: two-digit year and season abbreviation in
    // either order, `26/SP` or `SP/26`.
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect();
    if let [a, b] = tokens.as_slice() {
        let abbrev = |s: &str| match s {
            "sp" => Some(10),
            "su" => Some(20),
            "fa" => Some(30),
            "wi" => Some(40),
            _ => None,
        };
        let short_year = |s: &str| {
            (s.len() == 2 && s.chars().all(|c| c.is_ascii_digit())).then(|| format!("20{s}"))
        };
        let found = match (abbrev(a), abbrev(b)) {
            (Some(code), None) => short_year(b).map(|year| (code, year)),
            (None, Some(code)) => short_year(a).map(|year| (code, year)),
            _ => None,
        };
        if let Some((season, year)) = found {
            let name = season_name(season)?;
            return Some(TermInfo {
                label: format!("{name} {year}"),
                code: format!("{year}{season:02}"),
            });
        }
    }

    let season = SEASONS
        .iter()
        .find(|(name, _)| lowered.contains(name))
        .map(|(_, code)| *code)?;
    let year: String = {
        let digits: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .collect();
        let candidate = digits.iter().find(|s| s.len() == 4)?;
        candidate.to_string()
    };

    let name = season_name(season)?;
    Some(TermInfo {
        label: format!("{name} {year}"),
        code: format!("{year}{season:02}"),
    })
}

/// Canonicalize a room label into building code plus zero-padded number.
/// Returns `None` when no room number can be found.
pub fn normalize_space_label(raw: &str) -> Option<SpaceLabel> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let split = trimmed.find(|c: char| c.is_ascii_digit())?;
    let building_code: String = trimmed[..split]
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    if building_code.is_empty() {
        return None;
    }

    let rest = trimmed[split..].trim();
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let suffix: String = rest[digits.len()..]
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();

    let space_number = format!("{:0>4}{}", digits, suffix);
    Some(SpaceLabel {
        space_key: format!("{building_code}:{space_number}"),
        building_code,
        space_number,
        display_name: trimmed.to_string(),
    })
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_person_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = true;
    for c in raw.trim().chars() {
        if c.is_alphabetic() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if (c.is_whitespace() || c == '-') && !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Common-nickname canonicalization: `bob` and `robert` both map to
/// `robert`. Unknown names pass through normalized.
pub fn canonical_first_name(raw: &str) -> String {
    const NICKNAMES: &[(&str, &str)] = &[
        ("bob", "robert"),
        ("rob", "robert"),
        ("bobby", "robert"),
        ("bill", "william"),
        ("will", "william"),
        ("billy", "william"),
        ("liz", "elizabeth"),
        ("beth", "elizabeth"),
        ("betty", "elizabeth"),
        ("jim", "james"),
        ("jimmy", "james"),
        ("mike", "michael"),
        ("tom", "thomas"),
        ("tommy", "thomas"),
        ("dick", "richard"),
        ("rick", "richard"),
        ("rich", "richard"),
        ("kate", "katherine"),
        ("katie", "katherine"),
        ("kathy", "katherine"),
        ("dave", "david"),
        ("dan", "daniel"),
        ("danny", "daniel"),
        ("steve", "steven"),
        ("sue", "susan"),
        ("suzie", "susan"),
        ("tony", "anthony"),
        ("drew", "andrew"),
        ("andy", "andrew"),
        ("ted", "theodore"),
        ("ed", "edward"),
        ("eddie", "edward"),
        ("peggy", "margaret"),
        ("meg", "margaret"),
        ("joe", "joseph"),
        ("joey", "joseph"),
        ("chuck", "charles"),
        ("charlie", "charles"),
        ("chris", "christopher"),
        ("pat", "patricia"),
        ("jen", "jennifer"),
        ("jenny", "jennifer"),
        ("becky", "rebecca"),
        ("sam", "samuel"),
        ("nick", "nicholas"),
        ("alex", "alexander"),
        ("matt", "matthew"),
        ("ben", "benjamin"),
        ("nate", "nathan"),
        ("zack", "zachary"),
        ("greg", "gregory"),
        ("ken", "kenneth"),
        ("ron", "ronald"),
        ("don", "donald"),
        ("frank", "francis"),
        ("fred", "frederick"),
        ("hank", "henry"),
        ("harry", "henry"),
        ("larry", "lawrence"),
        ("jerry", "gerald"),
        ("terry", "terrence"),
        ("tim", "timothy"),
        ("vicky", "victoria"),
        ("wendy", "gwendolyn"),
    ];

    let normalized = normalize_person_name(raw);
    let first_token = normalized.split(' ').next().unwrap_or_default();
    for (nick, canonical) in NICKNAMES {
        if first_token == *nick || first_token == *canonical {
            return (*canonical).to_string();
        }
    }
    first_token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_codes_are_space_delimited_uppercase() {
        assert_eq!(normalize_course_code("adm1300"), "ADM 1300");
        assert_eq!(normalize_course_code("ADM 1300"), "ADM 1300");
        assert_eq!(normalize_course_code("  adm-1300 "), "ADM 1300");
        assert_eq!(normalize_course_code("SEM"), "SEM");
    }

    #[test]
    fn terms_map_to_canonical_label_and_code() {
        let spring = normalize_term("spring 2026").unwrap();
        assert_eq!(spring.label, "Spring 2026");
        assert_eq!(spring.code, "202610");

        assert_eq!(normalize_term("SPRING 2026").unwrap(), spring);
        assert_eq!(normalize_term("202610").unwrap(), spring);
        assert_eq!(normalize_term("2026 Spring").unwrap(), spring);

        let fall = normalize_term("Fall 2025").unwrap();
        assert_eq!(fall.code, "202530");
        assert_eq!(normalize_term("autumn 2025").unwrap().code, "202530");

        assert!(normalize_term("").is_none());
        assert!(normalize_term("sometime").is_none());
    }

    #[test]
    fn compact_term_spellings_map_like_full_ones() {
        let spring = normalize_term("spring 2026").unwrap();
        assert_eq!(normalize_term("26/SP").unwrap(), spring);
        assert_eq!(normalize_term("sp/26").unwrap(), spring);
        assert_eq!(normalize_term("25/FA").unwrap().code, "202530");
        assert_eq!(normalize_term("25/WI").unwrap().code, "202540");

        // Not a season abbreviation or not a two-digit year: no signal.
        assert!(normalize_term("26/XX").is_none());
        assert!(normalize_term("2026/SP").is_none());
    }

    #[test]
    fn sections_shed_parenthesized_crn() {
        assert_eq!(normalize_section("01 (39316)"), "01");
        assert_eq!(normalize_section("01"), "01");
        assert_eq!(normalize_section(" 01a "), "01A");
        // A non-numeric parenthetical is part of the label.
        assert_eq!(normalize_section("01 (HONORS)"), "01 (HONORS)");
    }

    #[test]
    fn crn_extraction_requires_five_or_six_digits() {
        assert_eq!(extract_crn("01 (39316)"), Some("39316".to_string()));
        assert_eq!(extract_crn("123456"), Some("123456".to_string()));
        assert_eq!(extract_crn("01"), None);
        assert_eq!(extract_crn("1234567"), None);
    }

    #[test]
    fn phones_reduce_to_digits() {
        assert_eq!(normalize_phone("(254) 710-1234"), "2547101234");
        assert_eq!(normalize_phone("x1234"), "1234");
    }

    #[test]
    fn space_labels_get_padded_keys() {
        let space = normalize_space_label("Cashion 303").unwrap();
        assert_eq!(space.building_code, "CASHION");
        assert_eq!(space.space_number, "0303");
        assert_eq!(space.space_key, "CASHION:0303");
        assert_eq!(space.display_name, "Cashion 303");

        let annex = normalize_space_label("  cashion 303a").unwrap();
        assert_eq!(annex.space_key, "CASHION:0303A");

        assert!(normalize_space_label("Online").is_none());
        assert!(normalize_space_label("").is_none());
    }

    #[test]
    fn names_normalize_and_nicknames_canonicalize() {
        assert_eq!(normalize_person_name("  O'Brien,  Mary-Ann "), "obrien mary ann");
        assert_eq!(canonical_first_name("Bob"), "robert");
        assert_eq!(canonical_first_name("Robert"), "robert");
        assert_eq!(canonical_first_name("Xavier"), "xavier");
    }
}
