use crate::fees::{format_currency, parse_amount, FeeEntry, FeeSchedule};
use crate::heuristics::{self, Origin, PartySource};
use crate::identifiers::{first_admin_number, is_valid_judicial, judicial_matches};
use crate::models::{ExtractionResult, Field, FieldCandidate};
use crate::text::{prepare_lines, trim_set};

/// Source name recorded for fee-table backfills without a document.
pub const FEE_TABLE_SOURCE: &str = "tabela_honorarios";

/// Observation for a judicial number whose check digits do not add up.
pub fn invalid_check_digit_note(value: &str) -> String {
    format!("Dígito verificador inválido em {}: {value}", Field::CaseNumber.column())
}

/// Candidate sink bound to one source document.
struct Recorder<'t> {
    result: ExtractionResult,
    source: &'t str,
    text: &'t str,
}

impl<'t> Recorder<'t> {
    fn put(&mut self, field: Field, value: Option<String>, pattern: &str, weight: f64) {
        let Some(value) = value else {
            return;
        };
        let candidate = FieldCandidate::new(field, value, self.source)
            .with_pattern(pattern)
            .with_weight(weight)
            .located_in(Some(self.text));
        self.result.set(candidate);
    }

    fn has(&self, field: Field) -> bool {
        self.result.has(field)
    }
}

/// Per-document heuristic battery. Each step proposes weighted candidates;
/// the stored value per field is settled by [`ExtractionResult::set`].
pub struct FieldExtractor<'a> {
    fees: &'a FeeSchedule,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(fees: &'a FeeSchedule) -> Self {
        Self { fees }
    }

    pub fn extract(&self, source: &str, text: &str) -> ExtractionResult {
        let mut recorder = Recorder {
            result: ExtractionResult::new(),
            source,
            text,
        };
        if text.trim().is_empty() {
            recorder.result.observe("Sem texto legível no ZIP");
            return recorder.result;
        }

        let lines = prepare_lines(text);
        let origin = heuristics::arbitration_origin(source, text);

        self.case_numbers(&mut recorder);
        self.court_and_district(&mut recorder, &lines);
        self.parties(&mut recorder, &lines);
        self.expert_and_examination(&mut recorder, &lines);
        self.fee_values(&mut recorder, &lines, origin);
        self.dates_and_checks(&mut recorder, &lines, origin);

        recorder.result
    }

    fn case_numbers(&self, recorder: &mut Recorder<'_>) {
        // invalid numbers before the first valid one are reported, never stored
        for number in judicial_matches(recorder.text) {
            if is_valid_judicial(number) {
                recorder.put(Field::CaseNumber, Some(number.to_string()), "processo_regex", 1.0);
                break;
            }
            recorder.result.observe(invalid_check_digit_note(number));
        }
        let admin = first_admin_number(recorder.text);
        recorder.put(Field::AdminCaseNumber, admin, "admin_regex", 1.0);
    }

    fn court_and_district(&self, recorder: &mut Recorder<'_>, lines: &[&str]) {
        let text = recorder.text;
        recorder.put(
            Field::Court,
            heuristics::first_match(&heuristics::COURT_RE, text),
            "juizo_regex",
            1.0,
        );
        recorder.put(
            Field::District,
            heuristics::first_match(&heuristics::DISTRICT_RE, text),
            "comarca_regex",
            1.0,
        );

        if !recorder.has(Field::Court) {
            recorder.put(
                Field::Court,
                heuristics::line_value(lines, &["juízo", "vara"]),
                "juizo_line",
                0.9,
            );
        }
        if !recorder.has(Field::Court) {
            recorder.put(
                Field::Court,
                heuristics::court_from_requester(lines),
                "juizo_requerente",
                0.85,
            );
        }

        if !recorder.has(Field::District) {
            let district = heuristics::district_from(recorder.result.value(Field::Court))
                .or_else(|| heuristics::district_from(text));
            recorder.put(Field::District, district, "comarca_from_juizo", 0.9);
        }
    }

    fn parties(&self, recorder: &mut Recorder<'_>, lines: &[&str]) {
        let parties = heuristics::extract_parties(lines, recorder.text);
        for (field, party) in [
            (Field::Plaintiff, parties.plaintiff),
            (Field::Defendant, parties.defendant),
        ] {
            if let Some((value, origin)) = party {
                let weight = match origin {
                    PartySource::Paragraph => 1.0,
                    PartySource::Labels | PartySource::Phrases => 0.9,
                };
                recorder.put(field, Some(value), origin.pattern(), weight);
            }
        }
    }

    fn expert_and_examination(&self, recorder: &mut Recorder<'_>, lines: &[&str]) {
        let info = heuristics::extract_expert_info(lines);
        let non_empty = |value: &str| Some(value.to_string()).filter(|value| !value.is_empty());

        recorder.put(Field::Expert, non_empty(&info.name), "perito_info", 1.0);
        recorder.put(Field::ExpertTaxId, non_empty(&info.tax_id), "perito_info", 1.0);
        if info.specialty.is_empty() {
            recorder.put(
                Field::Specialty,
                heuristics::line_value(lines, heuristics::SPECIALTY_LABELS),
                "especialidade_labels",
                0.9,
            );
        } else {
            recorder.put(Field::Specialty, Some(info.specialty.clone()), "perito_info", 1.0);
        }

        let source = recorder.source;
        let text = recorder.text;
        if let Some(species) = heuristics::examination_type_from_text(lines, text) {
            apply_species(&mut recorder.result, self.fees, &species, source, Some(text), 1.0, None);
        } else if let Some(entry) = self.fees.from_specialty(&info) {
            let entry = entry.clone();
            let description = entry.description.clone();
            apply_species(
                &mut recorder.result,
                self.fees,
                &description,
                source,
                Some(text),
                0.7,
                Some(entry),
            );
        }
    }

    fn fee_values(&self, recorder: &mut Recorder<'_>, lines: &[&str], origin: Option<Origin>) {
        let text = recorder.text;

        if !recorder.has(Field::FeeFactor) {
            let factor = heuristics::line_or_after(text, lines, heuristics::FACTOR_LABELS, 50);
            recorder.put(Field::FeeFactor, factor, "fator_label", 0.8);
        }
        if !recorder.has(Field::TabulatedValue) {
            let tabulated = heuristics::line_or_after(text, lines, heuristics::TABULATED_LABELS, 80);
            recorder.put(Field::TabulatedValue, tabulated, "valor_tabelado", 0.8);
        }

        let arbitrated = heuristics::line_value(lines, heuristics::ARBITRATED_LABELS)
            .or_else(|| heuristics::first_currency(lines, heuristics::ARBITRATION_KEYWORDS));
        if let Some(value) = arbitrated {
            record_arbitration(recorder, value, origin);
        }
    }

    fn dates_and_checks(&self, recorder: &mut Recorder<'_>, lines: &[&str], origin: Option<Origin>) {
        let text = recorder.text;
        let labeled = |labels: &[&str], max_chars: usize| {
            heuristics::line_or_after(text, lines, labels, max_chars)
        };

        recorder.put(Field::Check, labeled(heuristics::CHECK_LABELS, 40), "checagem", 0.8);

        match origin {
            Some(origin) => {
                let weight = match origin {
                    Origin::Council => 1.1,
                    Origin::Directorate => 1.0,
                };
                let code = origin.code();
                recorder.put(
                    Field::AdvanceDate,
                    labeled(heuristics::ADVANCE_DATE_LABELS, 40),
                    &format!("data_adiantamento_{code}"),
                    weight,
                );
                recorder.put(
                    Field::AdvanceCheck,
                    labeled(heuristics::ADVANCE_CHECK_LABELS, 40),
                    &format!("checagem_adiant_{code}"),
                    weight,
                );
                recorder.put(
                    Field::AuthorizationDate,
                    labeled(heuristics::AUTHORIZATION_LABELS, 60),
                    &format!("autorizacao_despesa_{code}"),
                    weight,
                );
            }
            None => recorder.put(
                Field::AuthorizationDate,
                labeled(heuristics::AUTHORIZATION_LABELS, 60),
                "autorizacao_despesa",
                0.7,
            ),
        }

        recorder.put(Field::BalanceDue, labeled(heuristics::BALANCE_LABELS, 60), "saldo", 0.7);
        recorder.put(
            Field::RequisitionDate,
            heuristics::find_label_date(text, heuristics::REQUISITION_LABELS),
            "data_requisicao",
            1.0,
        );

        let paid = recorder.result.get(Field::ArbitratedValue).map(str::to_string);
        recorder.put(Field::AmountPaid, paid, "valor_arbitrado", 1.0);

        if let Some(origin) = origin {
            let weight = match origin {
                Origin::Council => 1.1,
                Origin::Directorate => 1.0,
            };
            recorder.put(
                Field::Percentage,
                heuristics::extract_percentage(text),
                &format!("percentual_{}", origin.code()),
                weight,
            );
        }
    }
}

/// Routes an arbitrated value by the issuing body: council decisions weigh
/// 1.2 and also fill the CM column, directorate decisions 1.1 and the DE
/// column.
fn record_arbitration(recorder: &mut Recorder<'_>, value: String, origin: Option<Origin>) {
    match origin {
        Some(Origin::Council) => {
            recorder.put(Field::ArbitratedValueCm, Some(value.clone()), "valor_arbitrado_cm", 1.2);
            recorder.put(Field::ArbitratedValue, Some(value), "valor_arbitrado_cm", 1.2);
        }
        Some(Origin::Directorate) => {
            recorder.put(Field::ArbitratedValueDe, Some(value.clone()), "valor_arbitrado_de", 1.1);
            recorder.put(Field::ArbitratedValue, Some(value), "valor_arbitrado_de", 1.1);
        }
        None => recorder.put(Field::ArbitratedValue, Some(value), "valor_arbitrado", 1.0),
    }
}

/// Records an examination type and, when it resolves to a fee-table row, the
/// canonical description (`weight + 0.1`) plus the factor and tabulated value
/// (`weight + 0.05`) if those are still empty.
pub fn apply_species(
    result: &mut ExtractionResult,
    fees: &FeeSchedule,
    species: &str,
    source: &str,
    context: Option<&str>,
    weight: f64,
    matched: Option<FeeEntry>,
) {
    let species = trim_set(species, " \t-–:;");
    if species.is_empty() {
        return;
    }

    result.set(
        FieldCandidate::new(Field::ExaminationType, species, source)
            .with_pattern("especie_label")
            .with_weight(weight)
            .located_in(context),
    );

    let Some(entry) = matched.or_else(|| fees.canonicalize(species).cloned()) else {
        return;
    };

    let table_source = if source.is_empty() {
        FEE_TABLE_SOURCE
    } else {
        source
    };
    let table_candidate = |field: Field, value: String, weight: f64| {
        FieldCandidate::new(field, value, table_source)
            .with_pattern(FEE_TABLE_SOURCE)
            .with_weight(weight)
            .located_in(None)
    };

    if !entry.description.is_empty() {
        result.set(table_candidate(
            Field::ExaminationType,
            entry.description.clone(),
            weight + 0.1,
        ));
    }
    if !entry.id.is_empty() && !result.has(Field::FeeFactor) {
        result.set(table_candidate(Field::FeeFactor, entry.id.clone(), weight + 0.05));
    }
    if !result.has(Field::TabulatedValue) {
        if let Some(amount) = parse_amount(&entry.value) {
            result.set(table_candidate(
                Field::TabulatedValue,
                format_currency(amount),
                weight + 0.05,
            ));
        }
    }
}
