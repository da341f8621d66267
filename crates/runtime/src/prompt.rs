//! System prompt assembly.
//!
//! Exactly one system message is rendered per turn, rebuilt fresh from the
//! current extracted facts, the active language, and the registered tool
//! names. It is never persisted to history.

use chrono::Utc;
use std::fmt::Write;
use storage::{ExtractedInfo, Language};

/// Localized instruction block selecting the response language.
fn language_instructions(lang: Language) -> &'static str {
    match lang {
        Language::En => "LANGUAGE: Respond in English.",
        Language::Es => {
            "LANGUAGE: Respond in SPANISH (Español).\n\
             - Use formal \"usted\" form for politeness\n\
             - Use local Spanish terms for travel (vuelo, hotel, reserva, etc.)\n\
             - Format dates as DD/MM/YYYY (European style)\n\
             - Use euros (€) as default currency for European destinations, dollars ($) for Americas\n\
             - Be warm and courteous in tone"
        }
        Language::Fr => {
            "LANGUAGE: Respond in FRENCH (Français).\n\
             - Use formal \"vous\" form for politeness\n\
             - Use proper French travel terminology (vol, hôtel, réservation, etc.)\n\
             - Format dates as DD/MM/YYYY (European style)\n\
             - Use euros (€) as default currency for European destinations\n\
             - Maintain an elegant and professional tone"
        }
    }
}

/// Compact bulleted block of what is already known about the user.
/// Returns `None` when nothing has been extracted yet.
fn known_facts_block(info: &ExtractedInfo) -> Option<String> {
    if info.is_empty() {
        return None;
    }

    let mut block = String::from("KNOWN USER CONTEXT (DO NOT ASK FOR THIS INFO AGAIN):\n");
    if !info.destinations.is_empty() {
        let _ = writeln!(
            block,
            "- Destinations mentioned: {}",
            info.destinations.join(", ")
        );
    }
    if let Some(dates) = &info.travel_dates {
        if let Some(start) = &dates.start {
            match &dates.end {
                Some(end) => {
                    let _ = writeln!(block, "- Travel dates: {start} to {end}");
                }
                None => {
                    let _ = writeln!(block, "- Travel dates: {start}");
                }
            }
        }
    }
    if let Some(budget) = &info.budget {
        let _ = writeln!(block, "- Budget: {} {}", budget.amount, budget.currency);
    }
    if let Some(size) = info.party_size {
        let _ = writeln!(block, "- Party size: {size} people");
    }
    if !info.interests.is_empty() {
        let _ = writeln!(block, "- Interests: {}", info.interests.join(", "));
    }
    if let Some(lang) = info.language {
        let _ = writeln!(block, "- User language: {lang}");
    }

    Some(block.trim_end().to_string())
}

/// Render the system prompt for one turn.
pub fn build_system_prompt(info: &ExtractedInfo, tool_names: &[String]) -> String {
    let lang = info.active_language();
    let current_date = Utc::now().format("%Y-%m-%d");

    let context_section = known_facts_block(info)
        .map(|block| format!("\n{block}\n"))
        .unwrap_or_default();

    let tool_list = if tool_names.is_empty() {
        "(no tools are currently available; say so rather than inventing data)".to_string()
    } else {
        tool_names
            .iter()
            .map(|name| format!("- {name}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a premium multilingual travel concierge assistant with access to live travel data tools.\n\
         \n\
         CURRENT DATE: {current_date}\n\
         \n\
         === LANGUAGE & LOCALIZATION ===\n\
         \n\
         {language_block}\n\
         \n\
         IMPORTANT:\n\
         - ALWAYS respond in the user's language (detected: {lang})\n\
         - If the user switches language mid-conversation, switch your response language too\n\
         - Keep tool parameters in English (city names can be localized in the response)\n\
         - Adapt cultural context (currencies, date formats) to the user's region\n\
         {context_section}\
         \n\
         === TOOL USAGE RULES ===\n\
         \n\
         1. ALWAYS USE TOOLS FOR DATA\n\
         - NEVER make up flight prices, hotel costs, weather, or any travel data\n\
         - NEVER answer factual travel questions from memory\n\
         - ALWAYS call the appropriate tool to get real data, even for \"obvious\" questions\n\
         \n\
         2. AVAILABLE TOOLS:\n\
         {tool_list}\n\
         \n\
         === CONTEXT & CONVERSATION RULES ===\n\
         \n\
         1. NEVER ASK FOR INFORMATION ALREADY PROVIDED\n\
         - Review the conversation history and the KNOWN USER CONTEXT section\n\
         - If the user said \"Paris\" once, remember it\n\
         \n\
         2. MAKE SMART ASSUMPTIONS\n\
         - If the user says \"next weekend\", calculate the dates\n\
         - If no party size is mentioned, assume 1-2 adults\n\
         \n\
         3. BE PROACTIVE\n\
         - Once you have a destination, offer weather, flights, hotels, events\n\
         - Suggest alternatives when something is not available\n\
         \n\
         === RESPONSE FORMAT ===\n\
         \n\
         1. NO MARKDOWN - the chat channel cannot render it\n\
         - No **bold**, *italic*, # headers, `code`, [links](url)\n\
         - Use CAPS for emphasis, line breaks and dashes for structure\n\
         \n\
         2. BE CONCISE BUT COMPLETE\n\
         - Lead with the most important information\n\
         - Include prices, dates, key details",
        language_block = language_instructions(lang),
        lang = lang,
    )
}

/// Localized welcome message for a new connection.
pub fn welcome_message(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Welcome! I'm your personal travel concierge with access to real-time travel data.\n\
             \n\
             I can help you with:\n\
             - Flight searches\n\
             - Hotel recommendations\n\
             - Weather forecasts for your destination\n\
             - Local events and activities\n\
             - Currency conversions\n\
             \n\
             Where would you like to travel? Just tell me your destination and dates, and I'll find the best options for you!"
        }
        Language::Es => {
            "¡Bienvenido! Soy tu conserje de viajes personal con acceso a datos de viaje en tiempo real.\n\
             \n\
             Puedo ayudarte con:\n\
             - Búsqueda de vuelos\n\
             - Recomendaciones de hoteles\n\
             - Pronósticos del tiempo para tu destino\n\
             - Eventos y actividades locales\n\
             - Conversiones de moneda\n\
             \n\
             ¿A dónde te gustaría viajar? Solo dime tu destino y fechas, ¡y encontraré las mejores opciones para ti!"
        }
        Language::Fr => {
            "Bienvenue ! Je suis votre concierge de voyage personnel avec accès à des données de voyage en temps réel.\n\
             \n\
             Je peux vous aider avec :\n\
             - Recherche de vols\n\
             - Recommandations d'hôtels\n\
             - Prévisions météo pour votre destination\n\
             - Événements et activités locaux\n\
             - Conversions de devises\n\
             \n\
             Où souhaitez-vous voyager ? Indiquez-moi simplement votre destination et vos dates, et je trouverai les meilleures options pour vous !"
        }
    }
}

/// Welcome message matching a first user message's language, defaulting to
/// English when nothing can be detected.
pub fn welcome_for_user(first_message: Option<&str>) -> &'static str {
    let lang = first_message
        .and_then(crate::extract::detect_language)
        .unwrap_or_default();
    welcome_message(lang)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{Budget, TravelDates};

    #[test]
    fn empty_info_omits_context_section() {
        let prompt = build_system_prompt(&ExtractedInfo::default(), &[]);
        assert!(!prompt.contains("KNOWN USER CONTEXT"));
        assert!(prompt.contains("Respond in English."));
        assert!(prompt.contains("no tools are currently available"));
    }

    #[test]
    fn known_facts_render_only_present_fields() {
        let info = ExtractedInfo {
            destinations: vec!["Paris".into(), "Lyon".into()],
            budget: Some(Budget {
                amount: 2000.0,
                currency: "USD".into(),
            }),
            travel_dates: Some(TravelDates {
                start: Some("12/03/2026".into()),
                end: None,
            }),
            ..Default::default()
        };
        let prompt = build_system_prompt(&info, &["search_hotels".to_string()]);

        assert!(prompt.contains("Destinations mentioned: Paris, Lyon"));
        assert!(prompt.contains("Travel dates: 12/03/2026"));
        assert!(prompt.contains("Budget: 2000 USD"));
        assert!(!prompt.contains("Party size"));
        assert!(prompt.contains("- search_hotels"));
    }

    #[test]
    fn spanish_language_selects_spanish_instructions() {
        let info = ExtractedInfo {
            language: Some(Language::Es),
            ..Default::default()
        };
        let prompt = build_system_prompt(&info, &[]);
        assert!(prompt.contains("Respond in SPANISH"));
        assert!(prompt.contains("detected: es"));
    }

    #[test]
    fn welcome_follows_detected_language() {
        assert!(welcome_for_user(Some("Hola, quiero un vuelo")).starts_with("¡Bienvenido!"));
        assert!(welcome_for_user(Some("Bonjour !")).starts_with("Bienvenue !"));
        assert!(welcome_for_user(None).starts_with("Welcome!"));
    }
}
