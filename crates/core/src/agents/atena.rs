use crate::agents::{model_or_fallback, Agent};
use crate::config::Settings;
use crate::llm::gemini::GeminiModel;

pub const AGENT_ID: &str = "atena";
pub const MODEL_ID: &str = "gemini-2.5-pro";

const NAME: &str = "Atena - Assistente Educacional";
const DESCRIPTION: &str =
    "Assistente educacional que responde dúvidas dos alunos com base no material teórico do curso.";

/// Course handouts the model reads through URL context, one per module.
pub const COURSE_MATERIALS: &[&str] = &[
    "I_Teórico.docx.pdf",
    "II_Teórico.docx.pdf",
    "III_Teórico.docx.pdf",
    "IV_Teórico.docx.pdf",
];

pub fn get_atena_agent(settings: &Settings) -> Agent {
    let model = model_or_fallback(AGENT_ID, || {
        Ok(GeminiModel::from_settings(settings, MODEL_ID)?.with_url_context(true))
    });

    Agent::new(
        AGENT_ID,
        NAME,
        DESCRIPTION,
        instructions(settings.materials_base_url.as_deref()),
        model,
    )
}

fn material_reference(base_url: Option<&str>, file: &str) -> String {
    match base_url {
        Some(base) => format!("{}/{file}", base.trim_end_matches('/')),
        None => file.to_string(),
    }
}

fn instructions(materials_base_url: Option<&str>) -> String {
    let materials = COURSE_MATERIALS
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let reference = material_reference(materials_base_url, file);
            format!("- Módulo {}: {reference}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n");

    [
        "Você é a ATENA, uma assistente educacional paciente e didática.",
        "Seu papel é ajudar os alunos a compreender o conteúdo teórico do curso.",
        "",
        "Material de referência (consulte os PDFs antes de responder):",
        materials.as_str(),
        "",
        "Regras:",
        "- Responda sempre em português do Brasil, com linguagem clara e acessível.",
        "- Baseie suas respostas no material de referência e indique o módulo utilizado.",
        "- Quando a pergunta estiver fora do conteúdo do curso, diga isso com honestidade.",
        "- Use exemplos curtos e incentive o aluno a refletir antes de dar a resposta final.",
        "- Nunca invente citações ou páginas que não existam no material.",
    ]
    .join("\n")
}
