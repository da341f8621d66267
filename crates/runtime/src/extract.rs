//! Heuristic extraction of travel facts from user messages.
//!
//! Best-effort regex and keyword matching; facts accumulate append-only into
//! [`ExtractedInfo`]. The contract is `(prior facts, new message) -> updated
//! facts`, so a different extraction strategy can replace this one without
//! touching the dispatch loop.

use regex::Regex;
use std::sync::LazyLock;
use storage::{Budget, ExtractedInfo, Language, TravelDates};
use tracing::debug;

static DESTINATION_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        // "fly to Paris", "trip to New York" — capitalized words after a
        // travel preposition, stopping at the first lowercase word.
        Regex::new(
            r"(?:(?i:visit|going\s+to|traveling\s+to|trip\s+to|fly\s+to|flight\s+to|to))\s+([A-Z][a-zA-Z]*(?:\s+[A-Z][a-zA-Z]*)*(?:,\s*[A-Z][a-zA-Z]*)?)",
        )
        .unwrap(),
        Regex::new(r"\b(?:(?i:in|at))\s+([A-Z][a-zA-Z]*(?:\s+[A-Z][a-zA-Z]*)*(?:,\s*[A-Z][a-zA-Z]*)?)")
            .unwrap(),
    ]
});

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)(
            \d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}
            | (?: january|february|march|april|may|june|july|august
                | september|october|november|december
                | enero|febrero|marzo|abril|mayo|junio|julio|agosto
                | septiembre|octubre|noviembre|diciembre
                | janvier|février|mars|avril|mai|juin|juillet|août
                | septembre|octobre|novembre|décembre
              )\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s*\d{4})?
        )",
    )
    .unwrap()
});

static BUDGET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:budget|spend|afford|maximum|max|up\s*to)\s*(?:is|of|:)?\s*\$?\s*(\d+(?:,\d+)?(?:\.\d{2})?)\s*(usd|eur|gbp|dollars|euros)?",
    )
    .unwrap()
});

static PARTY_SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:people|persons|travelers|of\s+us|guests|adults)").unwrap()
});

/// Interest keywords matched case-insensitively, across supported languages.
const INTEREST_KEYWORDS: &[&str] = &[
    // English
    "beach",
    "mountains",
    "culture",
    "history",
    "food",
    "nightlife",
    "shopping",
    "adventure",
    "relaxation",
    "spa",
    "hiking",
    "diving",
    "skiing",
    "museum",
    "music",
    "art",
    "nature",
    "wildlife",
    "photography",
    "sports",
    // Spanish
    "playa",
    "montaña",
    "cultura",
    "historia",
    "comida",
    "gastronomía",
    "compras",
    "aventura",
    "relajación",
    "senderismo",
    "buceo",
    "esquí",
    "museo",
    "música",
    // French
    "plage",
    "montagne",
    "gastronomie",
    "cuisine",
    "détente",
    "randonnée",
    "plongée",
    "ski",
    "musée",
    "musique",
    "photographie",
];

static SPANISH_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)\b(hola|buenos?\s*d[ií]as?|buenas?\s*tardes?|buenas?\s*noches?|gracias|por\s*favor|quiero|necesito|busco|viaje|vuelo|ayuda|cu[aá]nto|d[oó]nde|c[oó]mo|podr[ií]a|quisiera|estoy|tengo|voy|me\s*gustar[ií]a)\b")
            .unwrap(),
        // Inverted punctuation only appears in Spanish.
        Regex::new(r"[¿¡]").unwrap(),
        Regex::new(r"(?i)\b(aeropuerto|reserva|habitaci[oó]n|precio|fecha|desde|hasta|también|ahora|después|mañana|semana|mes|año)\b")
            .unwrap(),
    ]
});

static FRENCH_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)\b(bonjour|bonsoir|salut|merci|s'?il\s*vous\s*pla[iî]t|je\s*veux|je\s*voudrais|j'?aimerais|cherche|voyage|vol|h[oô]tel|aide|combien|o[uù]|comment|pouvez|pourriez|suis|vais)\b")
            .unwrap(),
        Regex::new(r"(?i)[àâäéèêëïîôùûüÿœæç]").unwrap(),
        Regex::new(r"(?i)\b(a[ée]roport|r[ée]servation|chambre|prix|depuis|jusqu'?[aà]|tr[eè]s|aussi|maintenant|apr[eè]s|avant|demain|semaine|mois|ann[ée]e)\b")
            .unwrap(),
    ]
});

/// Detect the user's language from one message.
///
/// Returns `Some` only on a confident match against the Spanish or French
/// marker patterns; English has no markers and is never detected confidently.
pub fn detect_language(message: &str) -> Option<Language> {
    if SPANISH_PATTERNS.iter().any(|p| p.is_match(message)) {
        return Some(Language::Es);
    }
    if FRENCH_PATTERNS.iter().any(|p| p.is_match(message)) {
        return Some(Language::Fr);
    }
    None
}

/// Fold one user message into the accumulated facts.
///
/// Destinations and interests accumulate with de-duplication; budget and
/// party size take the latest mention; dates fill empty slots only. Language
/// is set on first detection and switches only on a later confident match.
pub fn update_extracted_info(info: &mut ExtractedInfo, user_message: &str) {
    extract_destinations(info, user_message);
    extract_dates(info, user_message);
    extract_budget(info, user_message);
    extract_party_size(info, user_message);
    extract_interests(info, user_message);

    match detect_language(user_message) {
        Some(lang) => {
            if info.language != Some(lang) {
                debug!(language = %lang, "detected language");
            }
            info.language = Some(lang);
        }
        None => {
            if info.language.is_none() {
                info.language = Some(Language::En);
            }
        }
    }
}

fn extract_destinations(info: &mut ExtractedInfo, message: &str) {
    for pattern in DESTINATION_PATTERNS.iter() {
        for capture in pattern.captures_iter(message) {
            let Some(dest) = capture.get(1) else {
                continue;
            };
            let dest = dest.as_str().trim();
            // Skip trivial matches like "At I".
            if dest.chars().count() <= 2 {
                continue;
            }
            if !info.destinations.iter().any(|d| d == dest) {
                info.destinations.push(dest.to_string());
            }
        }
    }
}

fn extract_dates(info: &mut ExtractedInfo, message: &str) {
    let mut matches = DATE_PATTERN
        .captures_iter(message)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));

    let Some(first) = matches.next() else {
        return;
    };
    let dates = info.travel_dates.get_or_insert_with(TravelDates::default);
    if dates.start.is_none() {
        dates.start = Some(first);
    }
    if dates.end.is_none() {
        dates.end = matches.next();
    }
}

fn extract_budget(info: &mut ExtractedInfo, message: &str) {
    let Some(capture) = BUDGET_PATTERN.captures(message) else {
        return;
    };
    let Some(amount) = capture.get(1) else {
        return;
    };
    let Ok(amount) = amount.as_str().replace(',', "").parse::<f64>() else {
        return;
    };

    let currency = match capture.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(c) if c == "dollars" => "USD".to_string(),
        Some(c) if c == "euros" => "EUR".to_string(),
        Some(c) => c.to_uppercase(),
        None => "USD".to_string(),
    };

    info.budget = Some(Budget { amount, currency });
}

fn extract_party_size(info: &mut ExtractedInfo, message: &str) {
    if let Some(capture) = PARTY_SIZE_PATTERN.captures(message) {
        if let Some(size) = capture.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            info.party_size = Some(size);
        }
    }
}

fn extract_interests(info: &mut ExtractedInfo, message: &str) {
    let lower = message.to_lowercase();
    for interest in INTEREST_KEYWORDS {
        if lower.contains(interest) && !info.interests.iter().any(|i| i == interest) {
            info.interests.push(interest.to_string());
        }
    }
}
