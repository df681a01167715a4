//! Planner capability catalogue.
//!
//! The catalogue lists every topic the planner may emit, the rules that
//! disambiguate overlapping capabilities, the output contract and worked
//! examples. It is plain data: config can replace it and plugins extend it
//! through [`Capability`] entries.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::plugins::Capability;

/// A worked planner example shown in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogExample {
    pub label: String,
    pub plan: String,
}

impl CatalogExample {
    pub fn new(label: impl Into<String>, plan: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            plan: plan.into(),
        }
    }
}

/// The planner's view of what the bus can do.
///
/// Missing fields in a config override fall back to the built-in catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityCatalog {
    pub modules: Vec<Capability>,
    pub rules: Vec<String>,
    pub output_format: String,
    pub examples: Vec<CatalogExample>,
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CapabilityCatalog {
    /// Empty catalogue with only the output contract.
    pub fn empty() -> Self {
        Self {
            modules: Vec::new(),
            rules: Vec::new(),
            output_format: OUTPUT_FORMAT.to_string(),
            examples: Vec::new(),
        }
    }

    /// Add or replace entries, keyed by event name.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::orchestrator::CapabilityCatalog;
    /// use nexus_agent::plugins::Capability;
    /// use serde_json::json;
    ///
    /// let mut catalog = CapabilityCatalog::empty();
    /// catalog.extend([Capability::new("rss.fetch", "LEER un feed", json!({"url": "https://..."}))]);
    /// assert!(catalog.render().contains("### 1. rss.fetch (LEER un feed)"));
    /// ```
    pub fn extend(&mut self, capabilities: impl IntoIterator<Item = Capability>) {
        for cap in capabilities {
            match self.modules.iter_mut().find(|m| m.event == cap.event) {
                Some(existing) => *existing = cap,
                None => self.modules.push(cap),
            }
        }
    }

    /// Topics the planner is told about.
    pub fn events(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.event.as_str()).collect()
    }

    /// Render the catalogue as the tail of the system prompt.
    pub fn render(&self) -> String {
        let mut out = String::from("\n## Módulos disponibles\n");

        for (i, module) in self.modules.iter().enumerate() {
            out.push_str(&format!("\n### {}. {} ({})\n", i + 1, module.event, module.purpose));
            match &module.example {
                Value::Null => {}
                Value::String(text) => out.push_str(&format!("Datos: {}\n", text)),
                other => out.push_str(&format!("Datos: {}\n", other)),
            }
            for note in &module.notes {
                out.push_str(&format!("- {}\n", note));
            }
        }

        if !self.rules.is_empty() {
            out.push_str("\n## Reglas CRÍTICAS\n");
            for (i, rule) in self.rules.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, rule));
            }
        }

        out.push_str("\n## Formato OBLIGATORIO (un solo JSON)\n");
        out.push_str(&self.output_format);
        out.push('\n');

        if !self.examples.is_empty() {
            out.push_str("\n## Ejemplos\n");
            for example in &self.examples {
                out.push_str(&format!("\n{}:\n{}\n", example.label, example.plan));
            }
        }

        out
    }

    /// Catalogue of the stock collaborator modules.
    pub fn builtin() -> Self {
        Self {
            modules: builtin_modules(),
            rules: BUILTIN_RULES.iter().map(|r| r.to_string()).collect(),
            output_format: OUTPUT_FORMAT.to_string(),
            examples: BUILTIN_EXAMPLES
                .iter()
                .map(|(label, plan)| CatalogExample::new(*label, *plan))
                .collect(),
        }
    }
}

const OUTPUT_FORMAT: &str = r#"{"thinking": "análisis", "steps": [{"event": "...", "data": {...}, "description": "..."}], "response": "mensaje al usuario"}"#;

fn builtin_modules() -> Vec<Capability> {
    vec![
        Capability::new(
            "news.search",
            "NOTICIAS Y TENDENCIAS — usar para noticias, tendencias, resúmenes diarios",
            json!({"query": "inteligencia artificial startups"}),
        )
        .with_note("Busca en feeds RSS de fuentes confiables: Xataka, Genbeta, TechCrunch, The Verge, Google News, etc.")
        .with_note("Devuelve artículos REALES y ACTUALES (no datos de entrenamiento)")
        .with_note("USAR PARA: noticias, tendencias, resúmenes, \"qué está pasando en tech\", novedades")
        .with_note("QUERY: usa términos descriptivos del tema. Ejemplo: \"inteligencia artificial startups innovación\""),
        Capability::new(
            "weather.current",
            "CLIMA ACTUAL de una ciudad",
            json!({"city": "Buenos Aires"}),
        )
        .with_note("Devuelve temperatura, sensación térmica, humedad, viento, condición, amanecer/atardecer")
        .with_note("USAR PARA: \"qué clima hace\", \"cómo está el tiempo\", \"temperatura en X\""),
        Capability::new(
            "weather.forecast",
            "PRONÓSTICO extendido",
            json!({"city": "Rosario", "days": 5}),
        )
        .with_note("Pronóstico de 3 a 7 días con temperaturas, probabilidad de lluvia, condiciones")
        .with_note("USAR PARA: \"pronóstico\", \"va a llover\", \"clima de la semana\""),
        Capability::new(
            "browser.search",
            "BÚSQUEDAS WEB GENERALES — para info que NO sea noticias ni clima",
            json!({"query": "texto de búsqueda"}),
        )
        .with_note("Busca en Google/DuckDuckGo/Bing via browser real")
        .with_note("NO usar para noticias (usar news.search) ni clima (usar weather.current/forecast)")
        .with_note("QUERY: términos cortos y claros. NUNCA incluyas fechas (dd/mm/yyyy)."),
        Capability::new(
            "http.request",
            "APIs directas con URL conocida",
            json!(r#"{"method": "GET", "url": "...", "headers": {...}, "params": {...}}"#),
        )
        .with_note("APIs públicas SIN API key:")
        .with_note("IP INFO: https://ipinfo.io/json")
        .with_note("HORA: https://worldtimeapi.org/api/timezone/America/Argentina/Buenos_Aires"),
        Capability::new(
            "browser.navigate",
            "ir a una URL específica conocida",
            json!(r#"{"url": "https://..."}  (URL completa obligatoria)"#),
        ),
        Capability::new(
            "browser.extract",
            "scraping con selectores CSS",
            json!({"url": "https://...", "selectors": {"titulo": "h1", "precio": ".price"}}),
        ),
        Capability::new(
            "scheduler.add_job",
            "tareas programadas",
            json!(r#"{"id": "...", "name": "...", "trigger_type": "interval|cron|date", "trigger_args": {...}, "event_name": "task.execute", "event_data": {"instruction": "la tarea a ejecutar", "chat_id": CHAT_ID, "channel": "telegram:CHAT_ID"}}"#),
        )
        .with_note("IMPORTANTE: event_name SIEMPRE debe ser \"task.execute\" y event_data debe incluir \"instruction\" (qué hacer), \"chat_id\" (del usuario) y \"channel\"."),
    ]
}

const BUILTIN_RULES: &[&str] = &[
    "Para NOTICIAS, TENDENCIAS, RESÚMENES de actualidad: USA news.search (feeds RSS confiables y actuales)",
    "Para CLIMA, TEMPERATURA, PRONÓSTICO: USA weather.current o weather.forecast (NUNCA http.request a wttr.in)",
    "Para buscar info GENERAL en la web: USA browser.search (NUNCA http.request a buscadores)",
    "Para datos de APIs conocidas (hora, IP): USA http.request",
    "Si el usuario dice \"busca en la web\", \"buscá en internet\" → USA browser.search",
    "Para ir a una URL específica: USA browser.navigate",
    "NUNCA uses messaging.send — la respuesta llega al usuario automáticamente",
    "NUNCA le digas al usuario que busque él mismo — TÚ tienes las herramientas, ÚSALAS",
    "Si NO necesitas módulos, pon steps: [] y responde directamente",
    "Responde SOLO JSON válido, sin markdown, sin texto extra",
    "Si detectas info personal nueva del usuario, incluye \"profile_update\"",
    "Al programar tareas (scheduler.add_job), el campo \"response\" debe ser BREVE: solo confirma qué se programó, a qué hora y por qué canal. NO incluyas resúmenes anticipados ni datos inventados.",
];

const BUILTIN_EXAMPLES: &[(&str, &str)] = &[
    (
        "Búsqueda web",
        r#"{"thinking": "Busco info sobre Granadero Baigorria", "steps": [{"event": "browser.search", "data": {"query": "Granadero Baigorria Santa Fe Argentina"}, "description": "Buscar en Google"}], "response": "Buscando información..."}"#,
    ),
    (
        "Clima actual",
        r#"{"thinking": "Uso weather.current para el clima", "steps": [{"event": "weather.current", "data": {"city": "Rosario"}, "description": "Clima actual de Rosario"}], "response": "Consultando el clima..."}"#,
    ),
    (
        "Pronóstico",
        r#"{"thinking": "El usuario quiere saber si va a llover", "steps": [{"event": "weather.forecast", "data": {"city": "Buenos Aires", "days": 3}, "description": "Pronóstico 3 días Buenos Aires"}], "response": "Consultando el pronóstico..."}"#,
    ),
    (
        "Saludo",
        r#"{"thinking": "Es un saludo", "steps": [], "response": "¡Hola! ¿En qué te puedo ayudar?"}"#,
    ),
    (
        "Profile update",
        r#"{"thinking": "El usuario me dice su nombre", "steps": [], "response": "¡Encantado Joel!", "profile_update": {"field": "Name", "value": "Joel", "section": "Personal"}}"#,
    ),
    (
        "Tarea programada (el chat_id se obtiene del contexto)",
        r#"{"thinking": "El usuario quiere un resumen diario a las 18hs", "steps": [{"event": "scheduler.add_job", "data": {"id": "daily_tech_trends", "name": "Tendencias tech diarias", "trigger_type": "cron", "trigger_args": {"hour": 18, "minute": 0}, "event_name": "task.execute", "event_data": {"instruction": "Usa news.search para buscar noticias recientes sobre inteligencia artificial, startups y tecnología. Haz un resumen en español con los puntos más importantes.", "chat_id": 1714121336, "channel": "telegram:1714121336"}}, "description": "Programar resumen diario a las 18hs"}], "response": "Listo, programé un resumen diario de tendencias tech para las 18:00 hs."}"#,
    ),
];
