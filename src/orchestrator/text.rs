//! Text helpers for model output and search queries.

use once_cell::sync::Lazy;
use regex::Regex;

static REASONING_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
static CJK_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{4e00}-\x{9fff}\x{3400}-\x{4dbf}\x{2e80}-\x{2eff}\x{3000}-\x{303f}]+")
        .expect("valid regex")
});
static HEADING_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("valid regex"));
static RULE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^-{3,}\s*$").expect("valid regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid regex"));

/// Spanish filler words dropped from fallback search queries.
const FILLER_WORDS: &[&str] = &[
    "dame", "dime", "busca", "buscar", "encuentra", "encontrar", "quiero", "necesito",
    "muestrame", "muestra", "sobre", "acerca", "noticias", "resumen", "resumir", "importante",
    "importantes", "trata", "tratar", "evitar", "evita", "filtra", "filtrar", "contenido",
    "cosas", "demas", "deseado", "para", "como", "cual", "cuales", "donde", "cuando", "porque",
    "pero", "tambien", "también", "solo", "sólo", "algo", "nuevo", "nueva", "nuevos", "nuevas",
    "todo", "toda", "todos", "todas", "mas", "más", "mejor", "mejores", "hoy", "actual",
    "actuales", "dia", "día", "mundo", "mundial", "nivel", "favor", "puedes", "podés",
    "podrías", "podrias", "quisiera", "que", "del", "los", "las", "una", "uno", "unos", "unas",
    "con", "sin", "por", "este", "esta", "estos", "estas", "ese", "esa", "esos", "esas",
];

/// Substrings that mark an instruction as a news query.
const NEWS_KEYWORDS: &[&str] = &[
    "noticias",
    "tendencia",
    "novedades",
    "actualidad",
    "resumen",
    "tecnología",
    "startups",
    "innovación",
    "news",
    "trends",
];

/// Remove `<think>...</think>` reasoning blocks and trim.
pub fn strip_reasoning(text: &str) -> String {
    REASONING_BLOCK.replace_all(text, "").trim().to_string()
}

/// Tidy model prose before it reaches a user.
///
/// Drops CJK artefacts, Markdown heading marks and `---` rules, collapses
/// runs of blank lines and trims.
///
/// # Example
/// ```
/// use nexus_agent::orchestrator::clean_response;
///
/// let text = "## Clima\n\n\n\n**22°C** 晴\n---\nFin";
/// assert_eq!(clean_response(text), "Clima\n\n**22°C** \n\nFin");
/// ```
pub fn clean_response(text: &str) -> String {
    let text = CJK_RUN.replace_all(text, "");
    let text = HEADING_MARK.replace_all(&text, "");
    let text = RULE_LINE.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Whether the instruction reads like a request for news.
pub fn is_news_query(instruction: &str) -> bool {
    let lower = instruction.to_lowercase();
    NEWS_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Build a short search query from a natural-language instruction.
///
/// Quoted phrases come first, then content words longer than two
/// characters that are not filler and not already part of a quoted phrase.
/// At most `limit` terms are kept. Falls back to the first 80 characters of
/// the instruction when nothing survives.
///
/// # Example
/// ```
/// use nexus_agent::orchestrator::extract_search_query;
///
/// let q = extract_search_query(r#"dime que noticias encuentras de "openclaw" es un software libre"#, 8);
/// assert_eq!(q, "openclaw encuentras software libre");
/// ```
pub fn extract_search_query(instruction: &str, limit: usize) -> String {
    let quoted: Vec<&str> = QUOTED
        .captures_iter(instruction)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let quoted_text = quoted.join(" ").to_lowercase();

    let lower = instruction.to_lowercase();
    let keywords = WORD
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| !FILLER_WORDS.contains(w) && w.chars().count() > 2)
        .filter(|w| !quoted_text.contains(w));

    let query = quoted
        .iter()
        .copied()
        .chain(keywords)
        .take(limit)
        .collect::<Vec<_>>()
        .join(" ");

    if query.trim().is_empty() {
        truncate_chars(instruction, 80)
    } else {
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_reasoning_multiline() {
        let raw = "<think>\nlet me think\n{}\n</think>\n  {\"steps\": []}  ";
        assert_eq!(strip_reasoning(raw), "{\"steps\": []}");
        assert_eq!(strip_reasoning("<think>a</think>x<think>b</think>"), "x");
    }

    #[test]
    fn test_clean_response_keeps_bold() {
        let out = clean_response("### Titulo\n**dato** clave");
        assert_eq!(out, "Titulo\n**dato** clave");
    }

    #[test]
    fn test_clean_response_strips_cjk_punctuation() {
        assert_eq!(clean_response("hola、mundo"), "holamundo");
    }

    #[test]
    fn test_is_news_query() {
        assert!(is_news_query("Dame las NOTICIAS de hoy"));
        assert!(is_news_query("tech trends 2026"));
        assert!(!is_news_query("¿qué clima hace en Rosario?"));
    }

    #[test]
    fn test_extract_query_limit() {
        let q = extract_search_query("alpha beta gamma delta epsilon zeta", 3);
        assert_eq!(q, "alpha beta gamma");
    }

    #[test]
    fn test_extract_query_falls_back_to_instruction() {
        assert_eq!(extract_search_query("dame todo", 8), "dame todo");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("áéíóú", 2), "áé");
    }
}
