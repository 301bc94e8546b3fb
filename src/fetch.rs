use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::{blocking::Client, Url};

use crate::{
    report::{ArticleReport, XML_NOT_AVAILABLE},
    schema::SchemaValidator,
    xml::{self, Element, Node},
};

/// Remote service rendering one article as delivery XML.
pub trait MetadataSource {
    fn article_url(&self, collection: &str, code: &str) -> String;
    fn article_xml(&self, collection: &str, code: &str) -> Result<String>;
}

pub struct ArticleMetaClient {
    client: Client,
    base_url: Url,
}

impl ArticleMetaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid metadata service URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ArticleMetaClient { client, base_url })
    }

    fn request_url(&self, collection: &str, code: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("collection", collection)
            .append_pair("code", code)
            .append_pair("format", "xmlwos");
        url
    }
}

impl MetadataSource for ArticleMetaClient {
    fn article_url(&self, collection: &str, code: &str) -> String {
        self.request_url(collection, code).into()
    }

    fn article_xml(&self, collection: &str, code: &str) -> Result<String> {
        let url = self.request_url(collection, code);
        let response = self
            .client
            .get(url.clone())
            .send()
            .with_context(|| format!("Request failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("Metadata service refused: {}", url))?;
        response
            .text()
            .with_context(|| format!("Failed to read response body: {}", url))
    }
}

/// An article document carried through parse, canonical pretty form,
/// re-parse and schema validation. The schema sees the re-parsed canonical
/// form; the fragment handed on is the first parse. A parse failure
/// short-circuits the schema check.
#[derive(Debug)]
pub struct ValidatedXml {
    raw: Option<String>,
    canonical: Option<String>,
    tree: Option<Element>,
    errors: Vec<String>,
}

impl ValidatedXml {
    pub fn check<V: SchemaValidator + ?Sized>(raw: Option<String>, schema: &V) -> Self {
        let mut validated = ValidatedXml {
            raw,
            canonical: None,
            tree: None,
            errors: Vec::new(),
        };
        let Some(text) = validated.raw.as_deref() else {
            validated.errors.push(XML_NOT_AVAILABLE.to_string());
            return validated;
        };

        let canonical = xml::parse(text).and_then(|tree| {
            let pretty = xml::to_pretty_string(&tree)?;
            let reparsed = xml::parse(&pretty).context("Canonical form does not parse")?;
            Ok((tree, pretty, reparsed))
        });

        match canonical {
            Ok((tree, pretty, reparsed)) => {
                validated.errors = schema.validate(&reparsed);
                validated.canonical = Some(pretty);
                validated.tree = Some(tree);
            }
            Err(e) => validated.errors.push(format!("{:#}", e)),
        }
        validated
    }

    pub fn is_valid(&self) -> bool {
        self.tree.is_some() && self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn tree(&self) -> Option<&Element> {
        self.tree.as_ref()
    }

    /// Pretty text when the document parsed, otherwise the raw text broken
    /// before each tag.
    pub fn display_text(&self) -> String {
        match (&self.canonical, &self.raw) {
            (Some(pretty), _) => pretty.clone(),
            (None, Some(raw)) => xml::display_format(raw, None),
            (None, None) => XML_NOT_AVAILABLE.to_string(),
        }
    }

    /// The `article` fragment of a valid document.
    pub fn into_article(self) -> Option<Element> {
        if !self.is_valid() {
            return None;
        }
        let tree = self.tree?;
        if tree.name == "article" {
            return Some(tree);
        }
        tree.children.into_iter().find_map(|node| match node {
            Node::Element(el) if el.name == "article" => Some(el),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub enum ArticleOutcome {
    Valid(Element),
    Invalid(Vec<String>),
}

/// Fetches one article, validates it and keeps its error report in step:
/// written on failure, removed on success.
pub struct ArticleValidator<'a, M: MetadataSource + ?Sized, V: SchemaValidator + ?Sized> {
    source: &'a M,
    schema: &'a V,
    errors_root: PathBuf,
}

impl<'a, M: MetadataSource + ?Sized, V: SchemaValidator + ?Sized> ArticleValidator<'a, M, V> {
    pub fn new(source: &'a M, schema: &'a V, errors_root: impl Into<PathBuf>) -> Self {
        ArticleValidator {
            source,
            schema,
            errors_root: errors_root.into(),
        }
    }

    pub fn validate(&self, collection: &str, code: &str) -> Result<ArticleOutcome> {
        let url = self.source.article_url(collection, code);
        let raw = match self.source.article_xml(collection, code) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Unable to fetch XML for {} ({}): {:#}", code, collection, e);
                None
            }
        };

        let validated = ValidatedXml::check(raw, self.schema);
        let report = ArticleReport::new(&self.errors_root, collection, code);

        if validated.is_valid() {
            let display = validated.display_text();
            match validated.into_article() {
                Some(article) => {
                    report.delete()?;
                    debug!("Article {} is valid", code);
                    return Ok(ArticleOutcome::Valid(article));
                }
                None => {
                    let errors = vec!["Document has no article element".to_string()];
                    report.write(&display, &url, &errors)?;
                    return Ok(ArticleOutcome::Invalid(errors));
                }
            }
        }

        report.write(&validated.display_text(), &url, validated.errors())?;
        debug!(
            "Article {} is invalid ({} errors), report at {}",
            code,
            validated.errors().len(),
            report.path().display()
        );
        Ok(ArticleOutcome::Invalid(validated.errors().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::XsdSchema;
    use anyhow::anyhow;
    use std::collections::HashMap;

    const XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="articles">
    <xs:complexType>
      <xs:sequence><xs:element name="article" type="ArticleType" maxOccurs="unbounded"/></xs:sequence>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="ArticleType">
    <xs:sequence><xs:element name="title" type="xs:string"/></xs:sequence>
  </xs:complexType>
</xs:schema>"#;

    struct StubSource(HashMap<String, String>);

    impl MetadataSource for StubSource {
        fn article_url(&self, collection: &str, code: &str) -> String {
            format!("stub://{}/{}", collection, code)
        }

        fn article_xml(&self, _collection: &str, code: &str) -> Result<String> {
            self.0
                .get(code)
                .cloned()
                .ok_or_else(|| anyhow!("connection timed out"))
        }
    }

    const VALID: &str = "S0001-00012019000100001";
    const INVALID: &str = "S0001-00012019000100002";
    const MALFORMED: &str = "S0001-00012019000100003";
    const MISSING: &str = "S0001-00012019000100004";

    fn source() -> StubSource {
        let mut docs = HashMap::new();
        docs.insert(
            VALID.to_string(),
            "<articles><article><title>Ok</title></article></articles>".to_string(),
        );
        docs.insert(
            INVALID.to_string(),
            "<articles><article><subtitle>No</subtitle></article></articles>".to_string(),
        );
        docs.insert(MALFORMED.to_string(), "<articles><article></articles>".to_string());
        StubSource(docs)
    }

    #[test]
    fn valid_article_yields_fragment_and_clears_stale_report() {
        let dir = tempfile::tempdir().unwrap();
        let schema = XsdSchema::parse(XSD).unwrap();
        let source = source();
        let stale = ArticleReport::new(dir.path(), "scl", VALID);
        stale.write("old", "url", &["old error".to_string()]).unwrap();

        let validator = ArticleValidator::new(&source, &schema, dir.path());
        match validator.validate("scl", VALID).unwrap() {
            ArticleOutcome::Valid(article) => {
                assert_eq!(article.name, "article");
                assert_eq!(article.find("title").unwrap().text(), "Ok");
            }
            other => panic!("expected a valid article, got {:?}", other),
        }
        assert!(!stale.exists());
    }

    #[test]
    fn schema_violation_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let schema = XsdSchema::parse(XSD).unwrap();
        let source = source();
        let validator = ArticleValidator::new(&source, &schema, dir.path());

        let outcome = validator.validate("scl", INVALID).unwrap();
        assert!(matches!(outcome, ArticleOutcome::Invalid(ref errors) if !errors.is_empty()));
        let report = ArticleReport::new(dir.path(), "scl", INVALID);
        let text = std::fs::read_to_string(report.path()).unwrap();
        assert!(text.contains("stub://scl/"));
        assert!(text.contains("Element 'subtitle': This element is not expected. Expected is ( title )."));
    }

    #[test]
    fn malformed_xml_is_reported_with_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let schema = XsdSchema::parse(XSD).unwrap();
        let source = source();
        let validator = ArticleValidator::new(&source, &schema, dir.path());

        assert!(matches!(
            validator.validate("scl", MALFORMED).unwrap(),
            ArticleOutcome::Invalid(_)
        ));
        let report = ArticleReport::new(dir.path(), "scl", MALFORMED);
        let text = std::fs::read_to_string(report.path()).unwrap();
        assert!(text.starts_with("<articles>\n<article>\n</articles>"));
    }

    #[test]
    fn fetch_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let schema = XsdSchema::parse(XSD).unwrap();
        let source = source();
        let validator = ArticleValidator::new(&source, &schema, dir.path());

        match validator.validate("scl", MISSING).unwrap() {
            ArticleOutcome::Invalid(errors) => assert_eq!(errors, vec![XML_NOT_AVAILABLE.to_string()]),
            other => panic!("expected invalid, got {:?}", other),
        }
        assert!(ArticleReport::new(dir.path(), "scl", MISSING).exists());
    }

    struct AcceptAll;

    impl SchemaValidator for AcceptAll {
        fn validate(&self, _root: &Element) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn article_fragment_keeps_inline_spacing() {
        let raw = "<articles>\n  <article>\n    <title>x <i>a</i> <b>b</b></title>\n  </article>\n</articles>";
        let validated = ValidatedXml::check(Some(raw.to_string()), &AcceptAll);
        assert!(validated.is_valid());
        assert!(validated.display_text().contains("<title>x <i>a</i> <b>b</b></title>"));

        let article = validated.into_article().unwrap();
        assert_eq!(
            xml::to_compact_string(&article).unwrap(),
            "<article><title>x <i>a</i> <b>b</b></title></article>"
        );
    }

    #[test]
    fn document_without_article_yields_no_fragment() {
        let validated = ValidatedXml::check(Some("<articles><other/></articles>".to_string()), &AcceptAll);
        assert!(validated.is_valid());
        assert!(validated.into_article().is_none());
    }

    #[test]
    fn request_url_encodes_query_values() {
        let client = ArticleMetaClient::new(
            "http://articlemeta.scielo.org/api/v1/article",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.article_url("scl", "S0001-00012019000100001"),
            "http://articlemeta.scielo.org/api/v1/article?collection=scl&code=S0001-00012019000100001&format=xmlwos"
        );
        assert_eq!(
            client.article_url("scl", "a&format=json b"),
            "http://articlemeta.scielo.org/api/v1/article?collection=scl&code=a%26format%3Djson+b&format=xmlwos"
        );
        assert!(ArticleMetaClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn parse_failure_skips_schema_check() {
        let schema = XsdSchema::parse(XSD).unwrap();
        let validated = ValidatedXml::check(Some("<a><b></a>".to_string()), &schema);
        assert!(!validated.is_valid());
        assert_eq!(validated.errors().len(), 1);
        assert!(validated.tree().is_none());
    }
}
