//! OCR planning and worker configuration rendering.
//!
//! A file is OCR'd when OCR is forced globally or its name contains
//! `.ocr.`. A `.ocr.{bundle}.` tag selects one configured language bundle,
//! otherwise every configured bundle is combined.

use kbsync_types::ExtractionSettings;

/// Built-in worker configuration template.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<properties>
  <parsers>
    <parser class="org.apache.tika.parser.DefaultParser">
      <parser-exclude class="org.apache.tika.parser.ocr.TesseractOCRParser"/>
    </parser>
    <parser class="org.apache.tika.parser.ocr.TesseractOCRParser">
      <params>
        <param name="skipOcr" type="bool">{{skip_ocr}}</param>
        <param name="tesseractPath" type="string">{{tesseract_path}}</param>
        <param name="tessdataPath" type="string">{{tesseract_datapath}}</param>
        <param name="language" type="string">{{ocr_languages}}</param>
      </params>
    </parser>
  </parsers>
  <service-loader initializableProblemHandler="ignore"/>
  <maxStringLength>{{max_content_length}}</maxStringLength>
</properties>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrPlan {
    pub enabled: bool,
    /// `+`-joined tesseract language codes
    pub languages: String,
}

impl OcrPlan {
    pub fn for_file(file_name: &str, settings: &ExtractionSettings) -> Self {
        let lower = file_name.to_lowercase();
        let enabled = settings.always_ocr || lower.contains(".ocr.");

        let tagged = settings
            .ocr_language_bundles
            .iter()
            .find(|(key, _)| lower.contains(&format!(".ocr.{}.", key.to_lowercase())))
            .map(|(_, languages)| languages.clone());

        let languages = tagged.unwrap_or_else(|| {
            settings
                .ocr_language_bundles
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("+")
        });

        Self { enabled, languages }
    }

    /// File name of the rendered configuration for this plan.
    pub fn config_file_name(&self) -> String {
        let languages = if self.languages.is_empty() {
            "default"
        } else {
            self.languages.as_str()
        };
        let mode = if self.enabled { "ocr" } else { "noocr" };
        format!("{}_{}_worker_config.xml", mode, languages)
    }
}

/// Substitute `{{name}}` placeholders in `template`.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{{{}}}}}", name), value)
    })
}

/// Render the worker configuration for `plan`.
pub fn render_worker_config(
    template: &str,
    plan: &OcrPlan,
    settings: &ExtractionSettings,
) -> String {
    render_template(
        template,
        &[
            ("skip_ocr", (!plan.enabled).to_string()),
            ("tesseract_path", settings.tesseract_path.clone()),
            ("tesseract_datapath", settings.tesseract_datapath.clone()),
            ("ocr_languages", plan.languages.clone()),
            ("max_content_length", settings.max_content_length.to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settings() -> ExtractionSettings {
        ExtractionSettings {
            ocr_language_bundles: BTreeMap::from([
                ("de".to_string(), "deu".to_string()),
                ("en".to_string(), "eng".to_string()),
            ]),
            ..ExtractionSettings::default()
        }
    }

    #[test]
    fn test_plain_file_has_no_ocr() {
        let plan = OcrPlan::for_file("report.pdf", &settings());
        assert!(!plan.enabled);
        assert_eq!(plan.languages, "deu+eng");
        assert_eq!(plan.config_file_name(), "noocr_deu+eng_worker_config.xml");
    }

    #[test]
    fn test_tagged_bundle_selected() {
        let plan = OcrPlan::for_file("Scan.OCR.de.pdf", &settings());
        assert!(plan.enabled);
        assert_eq!(plan.languages, "deu");
    }

    #[test]
    fn test_untagged_ocr_uses_all_bundles() {
        let plan = OcrPlan::for_file("scan.ocr.pdf", &settings());
        assert!(plan.enabled);
        assert_eq!(plan.languages, "deu+eng");
    }

    #[test]
    fn test_always_ocr() {
        let settings = ExtractionSettings {
            always_ocr: true,
            ..settings()
        };
        assert!(OcrPlan::for_file("report.pdf", &settings).enabled);
    }

    #[test]
    fn test_render_worker_config() {
        let settings = ExtractionSettings {
            tesseract_path: "/opt/tess".to_string(),
            max_content_length: 42,
            ..settings()
        };
        let plan = OcrPlan::for_file("a.ocr.en.png", &settings);
        let rendered = render_worker_config(DEFAULT_CONFIG_TEMPLATE, &plan, &settings);
        assert!(rendered.contains(r#"<param name="skipOcr" type="bool">false</param>"#));
        assert!(rendered.contains("<param name=\"language\" type=\"string\">eng</param>"));
        assert!(rendered.contains("/opt/tess"));
        assert!(rendered.contains("<maxStringLength>42</maxStringLength>"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_render_template_leaves_unknown_placeholders() {
        let out = render_template("{{a}}-{{b}}", &[("a", "1".to_string())]);
        assert_eq!(out, "1-{{b}}");
    }
}
