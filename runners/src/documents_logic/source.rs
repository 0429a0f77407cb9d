//! Demo document bodies and the payload source that produces them.

use chrono::NaiveDate;
use lib_reqflow::{Payload, PayloadSource, PipelineError};
use rand::Rng;
use serde::Serialize;

const TEXT_LEN: usize = 33;
const NUMBER_LEN: u32 = 10;
const DOC_TYPE: &str = "LP_INTRODUCE_GOODS";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    pub participant_inn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub certificate_document: String,
    pub certificate_document_date: NaiveDate,
    pub certificate_document_number: String,
    pub owner_inn: String,
    pub producer_inn: String,
    pub production_date: NaiveDate,
    pub tnved_code: String,
    pub uit_code: String,
    pub uitu_code: String,
}

/// The body posted for each request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub description: Description,
    pub doc_id: String,
    pub doc_status: String,
    pub doc_type: String,
    pub import_request: bool,
    pub owner_inn: String,
    pub participant_inn: String,
    pub producer_inn: String,
    pub production_date: NaiveDate,
    pub production_type: String,
    pub products: Vec<Product>,
    pub reg_date: NaiveDate,
    pub reg_number: String,
}

fn random_number<R: Rng>(rng: &mut R, digits: u32) -> String {
    rng.random_range(0..10u64.pow(digits)).to_string()
}

fn random_text<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.random_range(33u8..=126))).collect()
}

fn random_date<R: Rng>(rng: &mut R) -> NaiveDate {
    let month = rng.random_range(1..=12);
    let day = rng.random_range(1..=28);
    NaiveDate::from_ymd_opt(2023, month, day).unwrap_or(NaiveDate::MIN)
}

impl Document {
    /// A document filled with random values.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let product = Product {
            certificate_document: random_text(rng, TEXT_LEN),
            certificate_document_date: random_date(rng),
            certificate_document_number: random_number(rng, NUMBER_LEN),
            owner_inn: random_number(rng, NUMBER_LEN),
            producer_inn: random_number(rng, NUMBER_LEN),
            production_date: random_date(rng),
            tnved_code: random_number(rng, NUMBER_LEN),
            uit_code: random_text(rng, TEXT_LEN),
            uitu_code: random_text(rng, TEXT_LEN),
        };

        Document {
            description: Description {
                participant_inn: random_number(rng, NUMBER_LEN),
            },
            doc_id: random_number(rng, NUMBER_LEN),
            doc_status: random_text(rng, TEXT_LEN),
            doc_type: DOC_TYPE.to_string(),
            import_request: rng.random_bool(0.5),
            owner_inn: product.owner_inn.clone(),
            participant_inn: random_number(rng, NUMBER_LEN),
            producer_inn: product.producer_inn.clone(),
            production_date: product.production_date,
            production_type: random_text(rng, TEXT_LEN),
            products: vec![product],
            reg_date: random_date(rng),
            reg_number: random_number(rng, NUMBER_LEN),
        }
    }
}

/// # Document Source
///
/// Produces random documents with sequential payload ids starting at 1.
#[derive(Debug)]
pub struct DocumentSource {
    next_id: u64,
}

impl DocumentSource {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first_id: u64) -> Self {
        Self { next_id: first_id }
    }
}

impl Default for DocumentSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadSource<Document> for DocumentSource {
    fn next_payload(&mut self) -> Result<Payload<Document>, PipelineError> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| PipelineError::SourceFault("document ids exhausted".to_string()))?;
        Ok(Payload::new(id, Document::random(&mut rand::rng())))
    }
}
