use crate::models::Bucket;
use crate::text::head_chars;

/// Number of leading text characters inspected by [`classify`].
pub const CLASSIFIER_SNIPPET_CHARS: usize = 2000;

const LAUDO_KEYWORDS: [&str; 6] = [
    "laudo",
    "parecer",
    "relatorio pericial",
    "relatório pericial",
    "relatorio de pericia",
    "relatório de perícia",
];

const PRINCIPAL_NAME_KEYWORDS: [&str; 8] = [
    "despacho",
    "autorizacao",
    "autorização",
    "diesp",
    "diretoria especial",
    "magistratura",
    "cm_",
    "conselho da magistratura",
];

const PRINCIPAL_TEXT_KEYWORDS: [&str; 6] = [
    "assunto: autorizacao de pagamento",
    "assunto: autorização de pagamento",
    "pagamento de honorarios",
    "pagamento de honorários",
    "conselho da magistratura",
    "diretoria especial",
];

const APOIO_NAME_KEYWORDS: [&str; 11] = [
    "certida",
    "certidão",
    "informacao",
    "informação",
    "oficio",
    "ofício",
    "memorando",
    "interessado",
    "perito",
    "manifestacao",
    "manifestação",
];

const APOIO_TEXT_KEYWORDS: [&str; 6] = [
    "interessado",
    "perito",
    "movido por",
    "em face de",
    "juizo",
    "juízo",
];

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}

/// Assigns a bucket from the document name and the start of its text. Checks
/// run LAUDO, PRINCIPAL, APOIO in that order; anything else is OUTRO.
pub fn classify(name: &str, text: &str) -> Bucket {
    classify_with_snippet(name, text, CLASSIFIER_SNIPPET_CHARS)
}

pub fn classify_with_snippet(name: &str, text: &str, snippet_chars: usize) -> Bucket {
    let name = name.to_lowercase();
    let snippet = head_chars(text, snippet_chars).to_lowercase();

    if contains_any(&name, &LAUDO_KEYWORDS) || contains_any(&snippet, &LAUDO_KEYWORDS) {
        return Bucket::Laudo;
    }

    // certidões issued by the council carry the main decision
    let council_certificate =
        name.contains("certida") && (name.contains("magistratura") || name.contains("cm"));
    if council_certificate
        || contains_any(&name, &PRINCIPAL_NAME_KEYWORDS)
        || contains_any(&snippet, &PRINCIPAL_TEXT_KEYWORDS)
    {
        return Bucket::Principal;
    }

    if contains_any(&name, &APOIO_NAME_KEYWORDS) || contains_any(&snippet, &APOIO_TEXT_KEYWORDS) {
        return Bucket::Apoio;
    }

    Bucket::Outro
}

/// Secondary tag describing what a document is, kept in audit summaries.
pub fn tag_kind(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    let has = |keywords: &[&str]| contains_any(&lowered, keywords);

    if has(&["senten", "acórd", "acord"]) {
        Some("sentenca")
    } else if has(&["certidao", "certidão"]) {
        Some("certidao")
    } else if has(&["conselho da magistratura"]) {
        Some("conselho_magistratura")
    } else if has(&["empenho"]) {
        Some("nota_empenho")
    } else if lowered.contains("habilitação") && lowered.contains("perito") {
        Some("habilitacao_perito")
    } else if has(&["laudo"]) {
        Some("laudo")
    } else if has(&["despacho", "decisão", "decisao"]) {
        Some("despacho")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn classifies_laudo_by_name() {
        let bucket = classify("Laudo_Pericial_Financas.pdf", "Laudo pericial em engenharia");
        assert_eq!(bucket, Bucket::Laudo);
    }

    #[test]
    fn classifies_principal_by_text() {
        let text = "Assunto: Autorização de pagamento de honorários em favor do perito.";
        assert_eq!(classify("doc001.pdf", text), Bucket::Principal);
    }

    #[test]
    fn classifies_apoio_by_keywords() {
        let text = "Certidão. Interessado: Fulano de Tal – Perito Contábil.";
        assert_eq!(classify("certidao_interessado.pdf", text), Bucket::Apoio);
    }

    #[test]
    fn council_certificate_is_principal() {
        assert_eq!(classify("certidao_cm.pdf", "Certifico que"), Bucket::Principal);
    }

    #[test]
    fn defaults_to_outro() {
        let bucket = classify("comprovante_envio.pdf", "Documento genérico sem palavras chave.");
        assert_eq!(bucket, Bucket::Outro);
    }

    #[test]
    fn keywords_past_the_snippet_are_ignored() {
        let text = format!("{}laudo", "x".repeat(CLASSIFIER_SNIPPET_CHARS));
        assert_eq!(classify("doc.pdf", &text), Bucket::Outro);
    }

    #[test]
    fn tag_kind_prefers_first_rule() {
        assert_eq!(tag_kind("SENTENÇA proferida; certidão anexa"), Some("sentenca"));
        assert_eq!(tag_kind("Nota de Empenho nº 12"), Some("nota_empenho"));
        assert_eq!(tag_kind("Habilitação do perito judicial"), Some("habilitacao_perito"));
        assert_eq!(tag_kind("texto qualquer"), None);
    }

    proptest! {
        #[test]
        fn classify_is_total(name in ".{0,40}", text in ".{0,400}") {
            let bucket = classify(&name, &text);
            prop_assert!(Bucket::ORDER.contains(&bucket));
        }
    }
}
