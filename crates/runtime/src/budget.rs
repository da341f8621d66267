//! Context budgeting: keeps rendered prompts within a fixed character budget.
//!
//! Characters stand in for tokens (~4 chars per token). Three independent
//! limits apply: a per-tool-result cap with shape-aware summarization, a
//! per-history cap with oldest-first trimming, and an aggressive retry-time
//! trim used after a rate-limit rejection.

use serde_json::{Map, Value, json};
use storage::{ChatMessage, Role};
use tracing::debug;

/// Cap on a single serialized tool result (~1500 tokens).
pub const MAX_TOOL_RESULT_CHARS: usize = 6000;

/// Cap on the combined trimmed history (~2000 tokens).
pub const MAX_HISTORY_CHARS: usize = 8000;

/// How many recent messages are even considered for a prompt.
pub const HISTORY_WINDOW: usize = 20;

/// Per-tool-result cap applied during a retry after a rate limit.
pub const RETRY_TOOL_RESULT_CHARS: usize = 2000;

/// Tool results retained during a retry after a rate limit.
pub const RETRY_TOOL_RESULTS_KEPT: usize = 2;

const MAX_ARRAY_ITEMS: usize = 5;
const MAX_OBJECT_FIELDS: usize = 10;
const MAX_NESTING_DEPTH: usize = 3;
const WEATHER_FORECAST_ENTRIES: usize = 8;
const MAX_AMENITIES: usize = 5;

/// List-valued keys recognized in travel-search payloads.
const SEARCH_ARRAY_KEYS: &[&str] = &[
    "properties",
    "hotels",
    "flights",
    "events",
    "results",
    "brands",
];

/// Truncation strategy category, derived from the tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Hotel,
    Flight,
    Event,
    Weather,
    Generic,
}

impl ToolCategory {
    pub fn for_tool(name: &str) -> Self {
        if name.contains("hotel") {
            Self::Hotel
        } else if name.contains("flight") {
            Self::Flight
        } else if name.contains("event") {
            Self::Event
        } else if name.contains("weather") {
            Self::Weather
        } else {
            Self::Generic
        }
    }
}

/// Strategy table: category to structured-data transform.
fn transform_for(category: ToolCategory) -> fn(Value) -> Value {
    match category {
        ToolCategory::Hotel => summarize_hotel_results,
        ToolCategory::Flight => summarize_flight_results,
        ToolCategory::Event => summarize_event_results,
        ToolCategory::Weather => summarize_weather,
        ToolCategory::Generic => |data| limit_value(data, 0),
    }
}

/// Truncate a tool result to fit [`MAX_TOOL_RESULT_CHARS`].
///
/// Structured data is summarized shape-aware per the tool's category; plain
/// text falls back to hard character truncation. Hard truncation is also the
/// final safety net when the summarized form still exceeds the cap.
pub fn truncate_tool_result(content: &str, tool_name: &str) -> String {
    let total = char_len(content);
    if total <= MAX_TOOL_RESULT_CHARS {
        return content.to_string();
    }

    debug!(
        tool = tool_name,
        from = total,
        to = MAX_TOOL_RESULT_CHARS,
        "truncating tool result"
    );

    match serde_json::from_str::<Value>(content) {
        Ok(data) => {
            let summarize = transform_for(ToolCategory::for_tool(tool_name));
            let rendered = serde_json::to_string_pretty(&summarize(data))
                .unwrap_or_else(|_| content.to_string());
            if char_len(&rendered) > MAX_TOOL_RESULT_CHARS {
                hard_truncate(&rendered, total)
            } else {
                rendered
            }
        }
        Err(_) => hard_truncate(content, total),
    }
}

fn hard_truncate(content: &str, original_len: usize) -> String {
    let mut out = take_chars(content, MAX_TOOL_RESULT_CHARS);
    out.push_str(&format!(
        "\n\n[... Result truncated. Showing first {MAX_TOOL_RESULT_CHARS} characters of {original_len} total.]"
    ));
    out
}

fn summarize_hotel_results(data: Value) -> Value {
    summarize_search(data, project_hotel)
}

fn summarize_flight_results(data: Value) -> Value {
    summarize_search(data, project_flight)
}

fn summarize_event_results(data: Value) -> Value {
    summarize_search(data, project_event)
}

/// Retain search metadata and the first few entries of any list-valued
/// field, projecting each entry down to its family's essential fields and
/// annotating the truncation.
fn summarize_search(data: Value, project: fn(&Value) -> Value) -> Value {
    let Value::Object(mut map) = data else {
        return limit_value(data, 0);
    };

    if let Some(Value::Object(meta)) = map.get("search_metadata") {
        let mut kept = Map::new();
        for key in ["search_id", "location", "check_in_date", "check_out_date"] {
            if let Some(v) = meta.get(key) {
                kept.insert(key.to_string(), v.clone());
            }
        }
        map.insert("search_metadata".to_string(), Value::Object(kept));
    }

    for key in SEARCH_ARRAY_KEYS {
        let Some(Value::Array(entries)) = map.get(*key) else {
            continue;
        };
        if entries.is_empty() {
            continue;
        }
        let total = entries.len();
        let kept: Vec<Value> = entries.iter().take(MAX_ARRAY_ITEMS).map(project).collect();
        map.insert(key.to_string(), Value::Array(kept));
        map.insert(format!("{key}_truncated"), Value::Bool(true));
        map.insert(format!("{key}_total_count"), json!(total));
    }

    Value::Object(map)
}

/// First present value among candidate keys; payloads vary between upstream
/// search APIs.
fn pick<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| item.get(*k))
}

fn project_hotel(item: &Value) -> Value {
    let mut out = Map::new();
    let keep = |out: &mut Map<String, Value>, name: &str, value: Option<&Value>| {
        if let Some(v) = value {
            out.insert(name.to_string(), v.clone());
        }
    };

    keep(&mut out, "name", item.get("name"));
    keep(&mut out, "type", item.get("type"));
    keep(&mut out, "rate_per_night", pick(item, &["rate_per_night", "price"]));
    keep(&mut out, "total_rate", item.get("total_rate"));
    keep(&mut out, "overall_rating", pick(item, &["overall_rating", "rating"]));
    keep(&mut out, "reviews", item.get("reviews"));

    let location = match item.get("location") {
        Some(Value::String(s)) => Some(Value::String(s.clone())),
        Some(obj) => obj.get("address").cloned(),
        None => None,
    };
    if let Some(loc) = location {
        out.insert("location".to_string(), loc);
    }

    if let Some(Value::Array(amenities)) = item.get("amenities") {
        out.insert(
            "amenities".to_string(),
            Value::Array(amenities.iter().take(MAX_AMENITIES).cloned().collect()),
        );
    }
    keep(&mut out, "link", item.get("link"));

    Value::Object(out)
}

fn project_flight(item: &Value) -> Value {
    let mut out = Map::new();

    let airline = match item.get("airline") {
        Some(v) => Some(v.clone()),
        None => item.get("airlines").and_then(Value::as_array).map(|list| {
            Value::String(
                list.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        }),
    };
    if let Some(a) = airline {
        out.insert("airline".to_string(), a);
    }

    for (name, keys) in [
        ("price", &["price", "total_price"][..]),
        ("duration", &["duration", "total_duration"][..]),
        ("departure", &["departure", "departure_time"][..]),
        ("arrival", &["arrival", "arrival_time"][..]),
    ] {
        if let Some(v) = pick(item, keys) {
            out.insert(name.to_string(), v.clone());
        }
    }

    let stops = item
        .get("stops")
        .cloned()
        .or_else(|| {
            item.get("layovers")
                .and_then(Value::as_array)
                .map(|l| json!(l.len()))
        })
        .unwrap_or(json!(0));
    out.insert("stops".to_string(), stops);

    Value::Object(out)
}

fn project_event(item: &Value) -> Value {
    let mut out = Map::new();
    for (name, keys) in [
        ("title", &["title", "name"][..]),
        ("date", &["date", "start_date"][..]),
        ("venue", &["venue", "location"][..]),
        ("price", &["price", "ticket_price"][..]),
    ] {
        if let Some(v) = pick(item, keys) {
            out.insert(name.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

/// Cap forecast arrays to one day of 3-hour intervals.
fn summarize_weather(data: Value) -> Value {
    let Value::Object(mut map) = data else {
        return data;
    };

    if let Some(Value::Array(forecasts)) = map.get("forecasts") {
        if forecasts.len() > WEATHER_FORECAST_ENTRIES {
            let kept = forecasts
                .iter()
                .take(WEATHER_FORECAST_ENTRIES)
                .cloned()
                .collect();
            map.insert("forecasts".to_string(), Value::Array(kept));
            map.insert("forecasts_truncated".to_string(), Value::Bool(true));
        }
    }

    Value::Object(map)
}

/// Generic recursive limiter: arrays keep their first entries, objects their
/// first fields, and structures below the depth ceiling collapse to a
/// placeholder.
fn limit_value(data: Value, depth: usize) -> Value {
    if depth > MAX_NESTING_DEPTH {
        return Value::String("[nested data]".to_string());
    }

    match data {
        Value::Array(items) => {
            let total = items.len();
            let mut kept: Vec<Value> = items
                .into_iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| limit_value(item, depth + 1))
                .collect();
            if total > MAX_ARRAY_ITEMS {
                kept.push(Value::String(format!(
                    "[... and {} more items]",
                    total - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(kept)
        }
        Value::Object(map) => {
            let total = map.len();
            let mut kept = Map::new();
            for (key, value) in map.into_iter().take(MAX_OBJECT_FIELDS) {
                kept.insert(key, limit_value(value, depth + 1));
            }
            if total > MAX_OBJECT_FIELDS {
                kept.insert(
                    "_truncated".to_string(),
                    Value::String(format!("{} more fields", total - MAX_OBJECT_FIELDS)),
                );
            }
            Value::Object(kept)
        }
        scalar => scalar,
    }
}

/// The most recent messages considered for a prompt.
pub fn history_window(messages: &[ChatMessage]) -> &[ChatMessage] {
    let start = messages.len().saturating_sub(HISTORY_WINDOW);
    &messages[start..]
}

/// Trim history by dropping messages from the second position until the
/// combined size fits [`MAX_HISTORY_CHARS`] or only two messages remain.
pub fn trim_history_to_fit(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut total: usize = messages.iter().map(|m| char_len(&m.content)).sum();
    if total <= MAX_HISTORY_CHARS {
        return messages.to_vec();
    }

    debug!(total, "trimming history to fit budget");
    let mut trimmed = messages.to_vec();
    while total > MAX_HISTORY_CHARS && trimmed.len() > 2 {
        let removed = trimmed.remove(1);
        total -= char_len(&removed.content);
    }
    trimmed
}

/// Aggressive retry-time trim: keep all non-tool messages but only the most
/// recent tool results, each hard-capped.
pub fn aggressive_trim(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut kept_tool_results = 0;
    let mut trimmed: Vec<ChatMessage> = Vec::with_capacity(messages.len());

    for msg in messages.iter().rev() {
        if msg.role == Role::Tool {
            if kept_tool_results >= RETRY_TOOL_RESULTS_KEPT {
                continue;
            }
            kept_tool_results += 1;
            let mut capped = msg.clone();
            if char_len(&capped.content) > RETRY_TOOL_RESULT_CHARS {
                capped.content = take_chars(&capped.content, RETRY_TOOL_RESULT_CHARS);
                capped.content.push_str("\n[... truncated]");
            }
            trimmed.push(capped);
        } else {
            trimmed.push(msg.clone());
        }
    }

    trimmed.reverse();
    trimmed
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_count(s: &str) -> usize {
        s.chars().count()
    }

    #[test]
    fn short_results_pass_through() {
        let content = "{\"ok\": true}";
        assert_eq!(truncate_tool_result(content, "search_hotels"), content);
    }

    #[test]
    fn plain_text_is_hard_truncated_within_cap() {
        let content = "x".repeat(20_000);
        let out = truncate_tool_result(&content, "unknown_tool");
        // Cap plus the fixed truncation marker.
        assert!(char_count(&out) <= MAX_TOOL_RESULT_CHARS + 100);
        assert!(out.contains("Result truncated"));
    }

    #[test]
    fn oversized_hotel_payload_keeps_five_annotated_entries() {
        let hotels: Vec<Value> = (0..12)
            .map(|i| {
                json!({
                    "name": format!("Hotel {i}"),
                    "rate_per_night": 180 + i,
                    "overall_rating": 4.2,
                    "description": "d".repeat(600),
                    "amenities": ["wifi", "pool", "gym", "spa", "bar", "parking"],
                })
            })
            .collect();
        let content = serde_json::to_string(&json!({
            "search_metadata": { "search_id": "abc", "location": "Paris", "engine": "x" },
            "hotels": hotels,
        }))
        .unwrap();
        assert!(char_count(&content) > MAX_TOOL_RESULT_CHARS);

        let out = truncate_tool_result(&content, "search_hotels");
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["hotels"].as_array().unwrap().len(), 5);
        assert_eq!(parsed["hotels_truncated"], json!(true));
        assert_eq!(parsed["hotels_total_count"], json!(12));
        // Metadata projected down, bulky fields dropped.
        assert_eq!(parsed["search_metadata"]["search_id"], "abc");
        assert!(parsed["search_metadata"].get("engine").is_none());
        assert!(parsed["hotels"][0].get("description").is_none());
        assert_eq!(parsed["hotels"][0]["amenities"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn flight_entries_project_to_essential_fields() {
        let flights: Vec<Value> = (0..7)
            .map(|i| {
                json!({
                    "airlines": ["Air A", "Air B"],
                    "total_price": 420 + i,
                    "total_duration": "11h",
                    "departure_time": "08:00",
                    "arrival_time": "19:00",
                    "layovers": [{"airport": "AMS"}],
                    "extra": "e".repeat(1200),
                })
            })
            .collect();
        let content = serde_json::to_string(&json!({ "flights": flights })).unwrap();

        let out = truncate_tool_result(&content, "search_flights");
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let first = &parsed["flights"][0];
        assert_eq!(first["airline"], "Air A, Air B");
        assert_eq!(first["price"], json!(420));
        assert_eq!(first["stops"], json!(1));
        assert!(first.get("extra").is_none());
    }

    #[test]
    fn weather_forecasts_cap_at_eight() {
        let forecasts: Vec<Value> = (0..40)
            .map(|i| json!({ "hour": i, "detail": "d".repeat(200) }))
            .collect();
        let content = serde_json::to_string(&json!({
            "location": "Paris",
            "forecasts": forecasts,
        }))
        .unwrap();

        let out = truncate_tool_result(&content, "get_weather_forecast");
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["forecasts"].as_array().unwrap().len(), 8);
        assert_eq!(parsed["forecasts_truncated"], json!(true));
        assert_eq!(parsed["location"], "Paris");
    }

    #[test]
    fn generic_limiter_marks_overflow_and_collapses_depth() {
        let deep = json!({ "a": { "b": { "c": { "d": { "e": 1 } } } } });
        let wide: Vec<Value> = (0..20).map(|i| json!({ "i": i, "pad": "p".repeat(500) })).collect();
        let content = serde_json::to_string(&json!({ "deep": deep, "wide": wide })).unwrap();

        let out = truncate_tool_result(&content, "lookup_stock");
        let parsed: Value = serde_json::from_str(&out).unwrap();

        let wide_out = parsed["wide"].as_array().unwrap();
        assert_eq!(wide_out.len(), 6); // 5 entries plus overflow marker
        assert_eq!(wide_out[5], json!("[... and 15 more items]"));
        assert_eq!(parsed["deep"]["a"]["b"]["c"], json!("[nested data]"));
    }

    #[test]
    fn history_within_budget_is_untouched() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        assert_eq!(trim_history_to_fit(&messages).len(), 2);
    }

    #[test]
    fn history_trim_drops_second_message_first_and_terminates() {
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..6 {
            messages.push(ChatMessage::user(format!("{}{}", i, "m".repeat(2999))));
        }
        let trimmed = trim_history_to_fit(&messages);

        let total: usize = trimmed.iter().map(|m| m.content.chars().count()).sum();
        assert!(total <= MAX_HISTORY_CHARS);
        // The first message survives; the oldest following it went first.
        assert_eq!(trimmed[0].content, "sys");
        assert!(trimmed.iter().all(|m| !m.content.starts_with('0')));
    }

    #[test]
    fn history_trim_stops_at_two_messages() {
        let messages = vec![
            ChatMessage::system("s".repeat(9000)),
            ChatMessage::user("u".repeat(9000)),
            ChatMessage::assistant("a".repeat(9000)),
        ];
        let trimmed = trim_history_to_fit(&messages);
        assert_eq!(trimmed.len(), 2);
    }

    #[test]
    fn aggressive_trim_keeps_two_recent_capped_tool_results() {
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("q")];
        for i in 0..4 {
            messages.push(ChatMessage::tool(format!("{}{}", i, "t".repeat(5000)), format!("call_{i}")));
        }
        messages.push(ChatMessage::assistant("partial"));

        let trimmed = aggressive_trim(&messages);
        let tool_results: Vec<_> = trimmed.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_results.len(), RETRY_TOOL_RESULTS_KEPT);
        // The most recent two survive, oldest dropped.
        assert!(tool_results[0].content.starts_with('2'));
        assert!(tool_results[1].content.starts_with('3'));
        for result in tool_results {
            assert!(result.content.chars().count() <= RETRY_TOOL_RESULT_CHARS + 20);
        }
        // Non-tool messages all survive in order.
        assert_eq!(trimmed[0].content, "sys");
        assert_eq!(trimmed.last().unwrap().content, "partial");
    }

    #[test]
    fn history_window_takes_most_recent() {
        let messages: Vec<ChatMessage> =
            (0..30).map(|i| ChatMessage::user(format!("m{i}"))).collect();
        let window = history_window(&messages);
        assert_eq!(window.len(), HISTORY_WINDOW);
        assert_eq!(window[0].content, "m10");
    }
}
