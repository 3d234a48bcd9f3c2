use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};

use crate::lexicon::Lexicon;
use crate::model::Subject;
use crate::taxonomy::TaxonomyStore;

/// Sentinel for questions the taxonomy cannot place.
pub const UNKNOWN: &str = "Unknown";

/// Minimum confidence below which an external classifier verdict is ignored
/// in favor of the keyword layers.
const EXTERNAL_CONFIDENCE_FLOOR: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub area_tematica: String,
    pub tema: String,
    pub subtema: String,
    pub habilidad: String,
}

impl Classification {
    fn unknown(subject: Subject) -> Self {
        Self {
            area_tematica: UNKNOWN.to_string(),
            tema: UNKNOWN.to_string(),
            subtema: UNKNOWN.to_string(),
            habilidad: default_ability(subject),
        }
    }
}

/// Verdict from a remote zero-shot model. Only the area is mandatory; the
/// keyword layers refine whatever the model leaves blank.
#[derive(Debug, Clone)]
pub struct ExternalClassification {
    pub area: String,
    pub tema: Option<String>,
    pub habilidad: Option<String>,
    pub confidence: f32,
}

/// Anything that can map question text onto one of a fixed set of labels.
/// Implemented over HTTP by the store module; tests stub it directly.
pub trait ZeroShotClassifier {
    fn classify(&self, text: &str, labels: &[String]) -> Result<Option<ExternalClassification>>;
}

#[derive(Debug)]
pub struct Classifier<'a> {
    taxonomy: &'a TaxonomyStore,
    lexicon: &'a Lexicon,
    literary_cue: Regex,
    numeric_cue: Regex,
    algebraic_cue: Regex,
    geometry_cue: Regex,
    probability_cue: Regex,
}

impl<'a> Classifier<'a> {
    pub fn new(taxonomy: &'a TaxonomyStore, lexicon: &'a Lexicon) -> Result<Self> {
        Ok(Self {
            taxonomy,
            lexicon,
            literary_cue: Regex::new(
                r"(?i)\b(cuento|novela|poema|poes[íi]a|narrador|personaje|verso|estrofa|relato)\b",
            )?,
            numeric_cue: Regex::new(r"(?i)(\d+\s*[%]|\bfracci[óo]n\b|\bdecimal\b|\bporcentaje\b|\bpotencia\b|\bra[íi]z\b)")?,
            algebraic_cue: Regex::new(r"(?i)(\becuaci[óo]n\b|\bfunci[óo]n\b|\binc[óo]gnita\b|\bexpresi[óo]n algebraica\b|[a-z]\s*=|f\(x\))")?,
            geometry_cue: Regex::new(r"(?i)(\btri[áa]ngulo\b|\bc[íi]rculo\b|\bper[íi]metro\b|\b[áa]rea\b|\bvolumen\b|\b[áa]ngulo\b|\bvector\b|\bplano cartesiano\b)")?,
            probability_cue: Regex::new(r"(?i)(\bprobabilidad\b|\bazar\b|\bmuestra\b|\bpromedio\b|\bmedia\b|\bmediana\b|\bgr[áa]fico\b|\btabla de frecuencia\b)")?,
        })
    }

    /// Places one question in the three-level taxonomy and assigns a skill.
    ///
    /// Layer order: external model when one is wired in and confident, then
    /// keyword scoring against the lexicon, then the taxonomy rows
    /// themselves, then subject-specific cue passes. A subject with no
    /// taxonomy rows at all short-circuits to the Unknown triple.
    pub fn classify(
        &self,
        stem: &str,
        options: &[String],
        subject: Subject,
        external: Option<&dyn ZeroShotClassifier>,
    ) -> Classification {
        if self.taxonomy.entries_for(subject).is_empty() {
            debug!(subject = subject.code(), "no taxonomy rows, using sentinel");
            return Classification::unknown(subject);
        }

        let text = full_text(stem, options);
        let mut result = Classification::unknown(subject);

        if let Some(classifier) = external {
            self.apply_external(classifier, &text, subject, &mut result);
        }

        if result.area_tematica == UNKNOWN {
            result.area_tematica = self
                .score_lexicon_areas(&text, subject)
                .unwrap_or_else(|| UNKNOWN.to_string());
        }
        if result.area_tematica == UNKNOWN {
            if let Some(entry) = self.best_taxonomy_entry(&text, subject, None, None) {
                result.area_tematica = entry.0;
                result.tema = entry.1;
                result.subtema = entry.2;
            }
        }
        // Structural cues are a last resort; a taxonomy row match is always
        // more specific than a coarse area guess.
        if result.area_tematica == UNKNOWN && subject.is_math() {
            if let Some(area) = self.math_area(&text) {
                result.area_tematica = area;
            }
        }

        if result.tema == UNKNOWN {
            result.tema = self
                .score_lexicon_themes(&text, subject, &result.area_tematica)
                .or_else(|| {
                    self.best_taxonomy_entry(&text, subject, Some(&result.area_tematica), None)
                        .map(|entry| entry.1)
                })
                // Zero keyword evidence falls back to table order.
                .or_else(|| {
                    self.taxonomy
                        .themes_for(subject, &result.area_tematica)
                        .into_iter()
                        .next()
                })
                .unwrap_or_else(|| UNKNOWN.to_string());
        }

        if result.subtema == UNKNOWN && result.tema != UNKNOWN {
            result.subtema = self
                .best_taxonomy_entry(
                    &text,
                    subject,
                    Some(&result.area_tematica),
                    Some(&result.tema),
                )
                .map(|entry| entry.2)
                .or_else(|| {
                    self.taxonomy
                        .subtopics_for(subject, &result.area_tematica, &result.tema)
                        .into_iter()
                        .next()
                })
                .unwrap_or_else(|| UNKNOWN.to_string());
        }

        match subject {
            Subject::H => self.remap_history_fields(&text, &mut result),
            Subject::L => self.assign_language_fields(&text, &mut result),
            _ => {}
        }

        if result.habilidad.is_empty() {
            result.habilidad = default_ability(subject);
        }
        self.refine_ability(&text, subject, &mut result);

        result
    }

    fn apply_external(
        &self,
        classifier: &dyn ZeroShotClassifier,
        text: &str,
        subject: Subject,
        result: &mut Classification,
    ) {
        let labels = self.taxonomy.areas_for(subject);
        match classifier.classify(text, &labels) {
            Ok(Some(external)) if external.confidence >= EXTERNAL_CONFIDENCE_FLOOR => {
                debug!(
                    area = %external.area,
                    confidence = external.confidence,
                    "external classifier verdict accepted"
                );
                result.area_tematica = external.area;
                if let Some(tema) = external.tema {
                    result.tema = tema;
                }
                if let Some(habilidad) = external.habilidad {
                    result.habilidad = habilidad;
                }
            }
            Ok(Some(external)) => {
                debug!(
                    confidence = external.confidence,
                    "external classifier verdict below confidence floor"
                );
            }
            Ok(None) => {}
            Err(error) => {
                warn!("external classifier failed, using keyword layers: {error:#}");
            }
        }
    }

    fn score_lexicon_areas(&self, text: &str, subject: Subject) -> Option<String> {
        let tables = &self.lexicon.for_subject(subject)?.areas;
        best_label(tables.iter().map(|(name, keywords)| {
            (name.as_str(), keyword_score(text, keywords))
        }))
    }

    /// Scores lexicon theme tables, keeping only themes that coexist with the
    /// chosen area somewhere in the taxonomy. An area the taxonomy does not
    /// know (a coarse cue guess, say) leaves the candidate set unrestricted.
    fn score_lexicon_themes(&self, text: &str, subject: Subject, area: &str) -> Option<String> {
        let tables = &self.lexicon.for_subject(subject)?.themes;
        let allowed = self.taxonomy.themes_for(subject, area);
        best_label(
            tables
                .iter()
                .filter(|(name, _)| {
                    allowed.is_empty()
                        || allowed.iter().any(|theme| theme.eq_ignore_ascii_case(name))
                })
                .map(|(name, keywords)| (name.as_str(), keyword_score(text, keywords))),
        )
    }

    /// Scores taxonomy rows by their own keyword columns, optionally pinned
    /// to an already-chosen area or theme. Returns (area, theme, subtopic).
    fn best_taxonomy_entry(
        &self,
        text: &str,
        subject: Subject,
        area: Option<&str>,
        theme: Option<&str>,
    ) -> Option<(String, String, String)> {
        let mut best: Option<(usize, (String, String, String))> = None;

        for entry in self.taxonomy.entries_for(subject) {
            if let Some(area) = area {
                if area != UNKNOWN && !entry.area.eq_ignore_ascii_case(area) {
                    continue;
                }
            }
            if let Some(theme) = theme {
                if theme != UNKNOWN && !entry.theme.eq_ignore_ascii_case(theme) {
                    continue;
                }
            }

            // Rows without a keyword column score on their own name words.
            let score = if entry.keywords.is_empty() {
                name_word_score(text, &[&entry.area, &entry.theme, &entry.subtopic])
            } else {
                keyword_score(text, &entry.keywords)
            };
            if score == 0 {
                continue;
            }
            let candidate = (
                entry.area.clone(),
                entry.theme.clone(),
                entry.subtopic.clone(),
            );
            let better = match &best {
                None => true,
                Some((best_score, best_triple)) => {
                    score > *best_score || (score == *best_score && candidate < *best_triple)
                }
            };
            if better {
                best = Some((score, candidate));
            }
        }

        best.map(|(_, triple)| triple)
    }

    /// History themes drifted across curriculum revisions; a final cue pass
    /// folds every question onto the nine canonical themes regardless of what
    /// the keyword layers picked.
    fn remap_history_fields(&self, text: &str, result: &mut Classification) {
        let lowered = text.to_lowercase();
        let remap: &[(&[&str], &str, &str)] = &[
            (
                &["guerra fría", "muro de berlín", "bloque soviético"],
                "Historia",
                "Guerra Fría",
            ),
            (
                &["dictadura", "golpe de estado", "derechos humanos", "régimen militar"],
                "Historia",
                "Dictadura y transición",
            ),
            (
                &["salitre", "industrializac", "cuestión social"],
                "Historia",
                "Chile en el siglo XX",
            ),
            (
                &["independencia", "colonia", "conquista"],
                "Historia",
                "Formación del Estado nación",
            ),
            (
                &["constitución", "democracia", "ciudadan", "participación política"],
                "Formacion Ciudadana",
                "Democracia y participación",
            ),
            (
                &["derecho", "deber", "estado de derecho"],
                "Formacion Ciudadana",
                "Derechos y deberes",
            ),
            (
                &["mercado", "oferta", "demanda", "precio"],
                "Sistema Economico",
                "Funcionamiento del mercado",
            ),
            (
                &["inflación", "desempleo", "política monetaria", "banco central"],
                "Sistema Economico",
                "Indicadores macroeconómicos",
            ),
            (
                &["trabajo", "consumidor", "endeudamiento", "presupuesto"],
                "Sistema Economico",
                "Economía personal y trabajo",
            ),
        ];

        for (cues, area, theme) in remap {
            if cues.iter().any(|cue| lowered.contains(cue)) {
                result.area_tematica = (*area).to_string();
                result.tema = (*theme).to_string();
                return;
            }
        }
    }

    /// Language questions classify by reading skill rather than content: the
    /// theme follows the dominant cue phrase and the subtopic records the
    /// text genre.
    fn assign_language_fields(&self, text: &str, result: &mut Classification) {
        let lowered = text.to_lowercase();
        let themes: &[(&[&str], &str)] = &[
            (
                &["se puede inferir", "se deduce", "se desprende", "el propósito"],
                "Interpretar",
            ),
            (
                &["según el texto", "de acuerdo con el texto", "el texto menciona", "señala el texto"],
                "Localizar",
            ),
            (
                &["el autor", "la intención", "el efecto", "por qué el emisor", "qué función cumple"],
                "Evaluar",
            ),
        ];

        for (cues, theme) in themes {
            if cues.iter().any(|cue| lowered.contains(cue)) {
                result.tema = (*theme).to_string();
                break;
            }
        }
        if result.tema == UNKNOWN {
            result.tema = "Interpretar".to_string();
        }

        result.subtema = if self.literary_cue.is_match(text) {
            "en texto literario - narraciones".to_string()
        } else {
            "en texto no literario".to_string()
        };
    }

    fn math_area(&self, text: &str) -> Option<String> {
        if self.probability_cue.is_match(text) {
            return Some("Probabilidad y estadística".to_string());
        }
        if self.geometry_cue.is_match(text) {
            return Some("Geometría".to_string());
        }
        if self.algebraic_cue.is_match(text) {
            return Some("Álgebra y funciones".to_string());
        }
        if self.numeric_cue.is_match(text) {
            return Some("Números".to_string());
        }
        None
    }

    fn refine_ability(&self, text: &str, subject: Subject, result: &mut Classification) {
        let lowered = text.to_lowercase();
        let cues: &[(&str, &str)] = if matches!(subject, Subject::H | Subject::L) {
            &[
                ("evaluar", "Evaluar"),
                ("inferir", "Interpretar"),
                ("según el texto", "Localizar"),
            ]
        } else {
            &[
                ("modelo", "Modelar"),
                ("modela", "Modelar"),
                ("gráfico", "Representar"),
                ("representa", "Representar"),
                ("justifica", "Argumentar"),
                ("demuestra", "Argumentar"),
            ]
        };

        for (cue, label) in cues {
            if lowered.contains(cue) {
                result.habilidad = (*label).to_string();
                return;
            }
        }
    }
}

fn full_text(stem: &str, options: &[String]) -> String {
    let mut text = stem.to_string();
    for option in options {
        text.push(' ');
        text.push_str(option);
    }
    text
}

fn default_ability(subject: Subject) -> String {
    subject
        .ability_labels()
        .first()
        .map(|label| (*label).to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Sum of keyword length times occurrence count, measured on lowercased text.
/// Longer keywords weigh more so a specific term beats a generic one.
fn keyword_score(text: &str, keywords: &[String]) -> usize {
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .map(|keyword| {
            let keyword = keyword.to_lowercase();
            if keyword.is_empty() {
                return 0;
            }
            lowered.matches(&keyword).count() * keyword.chars().count()
        })
        .sum()
}

/// Scores a question against taxonomy label names directly: every word of
/// more than three characters counts like a keyword.
fn name_word_score(text: &str, names: &[&String]) -> usize {
    let lowered = text.to_lowercase();
    names
        .iter()
        .flat_map(|name| name.split_whitespace())
        .filter(|word| word.chars().count() > 3)
        .map(|word| {
            let word = word.to_lowercase();
            lowered.matches(&word).count() * word.chars().count()
        })
        .sum()
}

/// Picks the highest score; ties break on the alphabetically first name so a
/// rerun on the same bank always lands on the same label.
fn best_label<'a>(scores: impl Iterator<Item = (&'a str, usize)>) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for (name, score) in scores {
        if score == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_score, best_name)) => {
                score > best_score || (score == best_score && name < best_name)
            }
        };
        if better {
            best = Some((score, name));
        }
    }
    best.map(|(_, name)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::TaxonomyStore;

    fn taxonomy() -> TaxonomyStore {
        TaxonomyStore::parse(
            "subject;area;tema;subtema;keywords\n\
             CQ;Reacciones químicas;Estequiometría;Balance;mol,estequiometría,balance\n\
             CQ;Estructura atómica;Modelos atómicos;Bohr;átomo,electrón,orbital\n\
             H;Historia;Guerra Fría;Bloques;guerra fría,soviético\n\
             L;Interpretar;Interpretar;Inferencias;inferir\n\
             M1;Números;Porcentajes;Cálculo;porcentaje\n",
        )
        .unwrap()
    }

    fn lexicon() -> Lexicon {
        Lexicon::builtin().unwrap()
    }

    #[test]
    fn empty_taxonomy_yields_unknown_triple() {
        let taxonomy = TaxonomyStore::parse(
            "subject;area;tema;subtema;keywords\nH;Historia;Guerra Fría;Bloques;guerra\n",
        )
        .unwrap();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        let result = classifier.classify(
            "¿Cuántos mol de agua se forman en la reacción?",
            &[],
            Subject::CQ,
            None,
        );
        assert_eq!(result.area_tematica, UNKNOWN);
        assert_eq!(result.tema, UNKNOWN);
        assert_eq!(result.subtema, UNKNOWN);
    }

    #[test]
    fn chemistry_stoichiometry_question_lands_on_taxonomy_row() {
        let taxonomy = taxonomy();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        let result = classifier.classify(
            "Al balancear la ecuación, ¿cuántos mol de oxígeno se requieren según la estequiometría?",
            &[],
            Subject::CQ,
            None,
        );
        assert_eq!(result.area_tematica, "Reacciones químicas");
        assert_eq!(result.tema, "Estequiometría");
        assert_eq!(result.subtema, "Balance");
    }

    #[test]
    fn rows_without_keywords_fall_back_to_table_order() {
        let taxonomy = TaxonomyStore::parse(
            "subject;area;tema;subtema\nCQ;Reacciones químicas;Estequiometría;Balance\n",
        )
        .unwrap();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        let result = classifier.classify(
            "¿Cuántos mol de oxígeno exige la estequiometría indicada?",
            &[],
            Subject::CQ,
            None,
        );
        assert_eq!(result.area_tematica, "Reacciones químicas");
        assert_eq!(result.tema, "Estequiometría");
        assert_eq!(result.subtema, "Balance");
    }

    #[test]
    fn theme_layer_stays_inside_the_chosen_area() {
        let taxonomy = taxonomy();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        // "mol", "ecuación" and "volumen" pull the stoichiometry theme table
        // hard, but that theme never coexists with the atomic-structure area.
        let result = classifier.classify(
            "El átomo del isótopo presenta un orbital según su número atómico; la ecuación usa el volumen de un mol.",
            &[],
            Subject::CQ,
            None,
        );
        assert_eq!(result.area_tematica, "Estructura atómica");
        assert_eq!(result.tema, "Modelos atómicos");
        assert_eq!(result.subtema, "Bohr");
    }

    #[test]
    fn taxonomy_row_match_beats_structural_cue() {
        let taxonomy = TaxonomyStore::parse(
            "subject;area;tema;subtema;keywords\n\
             M1;Geometría analítica;Vectores;Magnitud;vector,magnitud\n",
        )
        .unwrap();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        // "vector" also triggers the coarse geometry cue; the row keywords
        // must win before that cue gets a chance.
        let result = classifier.classify(
            "El vector duplica su magnitud al aplicar la transformación.",
            &[],
            Subject::M1,
            None,
        );
        assert_eq!(result.area_tematica, "Geometría analítica");
        assert_eq!(result.tema, "Vectores");
        assert_eq!(result.subtema, "Magnitud");
    }

    #[test]
    fn history_cue_pass_overrides_keyword_layers() {
        let taxonomy = taxonomy();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        let result = classifier.classify(
            "Durante la Guerra Fría, la caída del Muro de Berlín marcó el fin de una época.",
            &[],
            Subject::H,
            None,
        );
        assert_eq!(result.area_tematica, "Historia");
        assert_eq!(result.tema, "Guerra Fría");
    }

    #[test]
    fn language_questions_get_skill_theme_and_genre_subtopic() {
        let taxonomy = taxonomy();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        let result = classifier.classify(
            "A partir del cuento, se puede inferir que el narrador desconfía del personaje.",
            &[],
            Subject::L,
            None,
        );
        assert_eq!(result.tema, "Interpretar");
        assert_eq!(result.subtema, "en texto literario - narraciones");

        let non_literary = classifier.classify(
            "Según el texto, el informe presenta tres causas del fenómeno.",
            &[],
            Subject::L,
            None,
        );
        assert_eq!(non_literary.tema, "Localizar");
        assert_eq!(non_literary.subtema, "en texto no literario");
    }

    #[test]
    fn math_structural_cues_pick_an_area() {
        let taxonomy = taxonomy();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();

        // Lexicon keywords settle this one before any structural cue runs.
        let result = classifier.classify(
            "Se lanza un dado y se calcula la probabilidad de obtener un número par.",
            &[],
            Subject::M1,
            None,
        );
        assert_eq!(result.area_tematica, "Estadistica");

        // No lexicon keyword fires here, so the structural cue decides.
        let result = classifier.classify(
            "El vector resultante duplica su magnitud al aplicar la transformación.",
            &[],
            Subject::M1,
            None,
        );
        assert_eq!(result.area_tematica, "Geometría");
    }

    struct FixedClassifier(ExternalClassification);

    impl ZeroShotClassifier for FixedClassifier {
        fn classify(
            &self,
            _text: &str,
            _labels: &[String],
        ) -> Result<Option<ExternalClassification>> {
            Ok(Some(self.0.clone()))
        }
    }

    #[test]
    fn confident_external_verdict_wins_unconfident_is_ignored() {
        let taxonomy = taxonomy();
        let lexicon = lexicon();
        let classifier = Classifier::new(&taxonomy, &lexicon).unwrap();
        let stem = "Al balancear la ecuación, ¿cuántos mol se requieren según la estequiometría?";

        let confident = FixedClassifier(ExternalClassification {
            area: "Estructura atómica".to_string(),
            tema: Some("Modelos atómicos".to_string()),
            habilidad: None,
            confidence: 0.9,
        });
        let result = classifier.classify(stem, &[], Subject::CQ, Some(&confident));
        assert_eq!(result.area_tematica, "Estructura atómica");
        assert_eq!(result.tema, "Modelos atómicos");

        let hesitant = FixedClassifier(ExternalClassification {
            area: "Estructura atómica".to_string(),
            tema: None,
            habilidad: None,
            confidence: 0.1,
        });
        let result = classifier.classify(stem, &[], Subject::CQ, Some(&hesitant));
        assert_eq!(result.area_tematica, "Reacciones químicas");
    }
}
