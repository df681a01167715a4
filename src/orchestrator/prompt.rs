//! Prompt assembly for the planner and the synthesis calls.

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::config::AgentConfig;

use super::catalog::CapabilityCatalog;

/// Channel prefix that carries a Telegram chat id.
pub const TELEGRAM_CHANNEL_PREFIX: &str = "telegram:";

/// System contract for turning step results into a reply.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = concat!(
    "Eres un asistente útil. Tu tarea es transformar los datos crudos obtenidos en una ",
    "respuesta clara, completa y bien formateada para el usuario en Telegram. ",
    "REGLAS ESTRICTAS: ",
    "1. SIEMPRE responde en ESPAÑOL (español de Argentina). ",
    "2. USA los datos reales que se obtuvieron, NO inventes información. ",
    "3. Organiza la información de forma legible con secciones si es necesario. ",
    "4. Si los datos incluyen contenido de una página web, extrae lo más relevante y preséntalo de forma útil. ",
    "5. Si hubo errores, NO le digas al usuario que busque él mismo. ",
    "   En su lugar, usa tu conocimiento para dar la mejor respuesta posible. ",
    "6. FORMATO para Telegram: ",
    "   - Usá **negritas** para títulos y datos clave. ",
    "   - Usá emojis con moderación para separar secciones y hacer visual: 🌡️ ☀️ 🌧️ 📰 🚀 💡 📊 etc. ",
    "   - NO uses ### headers, ---, tablas markdown ni HTML. ",
    "   - NO pongas disclaimers ni aclaraciones legales. ",
    "   - Sé directo y conversacional, como un amigo que te cuenta las noticias/datos. ",
    "7. Sé conciso pero informativo — incluye datos específicos, cifras, fechas, nombres. ",
    "8. NUNCA sugieras al usuario buscar en Google u otro buscador — vos sos su buscador. ",
    "9. NUNCA respondas en inglés. El idioma es ESPAÑOL siempre. ",
    "10. Si los datos ya vienen formateados con emojis y estructura (ej: datos de clima o noticias), ",
    "    usá esa estructura como base, no la reescribas desde cero. ",
    "11. PRIORIZAR artículos marcados como (HOY) o (AYER). Ignorar artículos de hace semanas/meses si ",
    "    el usuario pidió noticias 'del día de hoy' o 'actuales'."
);

/// System contract for summarising a fallback search result.
pub const FALLBACK_SYSTEM_PROMPT: &str = concat!(
    "Eres un asistente útil. Transformá los datos en una respuesta para Telegram. ",
    "REGLAS: Respondé en español argentino. Usá **negritas** para datos clave. ",
    "Usá emojis con moderación. NO pongas disclaimers. Sé directo y conversacional. ",
    "Si los datos ya vienen formateados, usá esa estructura como base. ",
    "Si NO hay datos relevantes a la pregunta, decilo honestamente."
);

/// Chat id encoded in a `telegram:<id>` channel.
pub fn chat_id_from_channel(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(TELEGRAM_CHANNEL_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Current time at the configured fixed UTC offset.
pub fn local_now(settings: &AgentConfig) -> DateTime<FixedOffset> {
    let offset = settings
        .utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset)
}

/// Inputs of the planner system prompt.
pub struct PromptContext<'a> {
    pub settings: &'a AgentConfig,
    pub now: DateTime<FixedOffset>,
    pub channel: &'a str,
    pub agent_profile: Option<&'a str>,
    pub user_profile: Option<&'a str>,
    pub catalog: &'a CapabilityCatalog,
}

/// Build the planner system prompt.
///
/// Identity line, live date and time, the chat id when the channel carries
/// one, both profiles when present, then the capability catalogue.
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut parts = vec![
        format!(
            "Eres {}, un agente AI. Responde SOLO con JSON válido, sin texto adicional.",
            ctx.settings.name
        ),
        format!(
            "\n## Contexto Actual\n- **Fecha y hora**: {}\n- **Fecha ISO**: {}\n- **Timezone**: {} (UTC{:+})",
            ctx.now.format("%A %d/%m/%Y %H:%M"),
            ctx.now.format("%Y-%m-%d"),
            ctx.settings.timezone,
            ctx.settings.utc_offset_hours,
        ),
    ];

    if let Some(chat_id) = chat_id_from_channel(ctx.channel) {
        parts.push(format!(
            "- **Chat ID del usuario**: {} (usar en scheduler.add_job para enviar resultados)",
            chat_id
        ));
    }
    if let Some(profile) = ctx.agent_profile.filter(|p| !p.is_empty()) {
        parts.push(format!("\n## Perfil del Agente\n{}", profile));
    }
    if let Some(profile) = ctx.user_profile.filter(|p| !p.is_empty()) {
        parts.push(format!("\n## Perfil del Usuario\n{}", profile));
    }
    parts.push(ctx.catalog.render());

    parts.join("\n")
}

/// User message of the synthesis call.
pub fn synthesis_context(
    now: &DateTime<FixedOffset>,
    instruction: &str,
    results_summary: Option<&str>,
    errors: &[String],
) -> String {
    let mut day = now.format("%A %d/%m/%Y").to_string();
    if let Some(first) = day.get(..1) {
        day = format!("{}{}", first.to_uppercase(), &day[1..].to_lowercase());
    }

    let mut parts = vec![
        format!(
            "📅 Fecha y hora actual: {} {} (Argentina)",
            day,
            now.format("%H:%M")
        ),
        format!("Tarea original: {}", instruction),
    ];
    if let Some(summary) = results_summary {
        parts.push(format!("Datos obtenidos:\n{}", summary));
    }
    if !errors.is_empty() {
        parts.push(format!("Errores en pasos:\n{}", errors.join("\n")));
    }
    parts.join("\n\n")
}
