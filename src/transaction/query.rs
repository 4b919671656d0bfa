//! Query façade of a transaction

use super::Transaction;
use crate::concept::{ConceptMap, Numeric};
use crate::types::{ClientError, Options, Result};
use crate::wire::{QueryKind, QueryRequest, Request, Response};

/// Runs TypeQL queries within one transaction
pub struct QueryManager<'a> {
    transaction: &'a Transaction,
}

impl<'a> QueryManager<'a> {
    pub(crate) fn new(transaction: &'a Transaction) -> Self {
        Self { transaction }
    }

    pub async fn define(&self, query: &str) -> Result {
        self.run_unit(QueryKind::Define, query, Options::new()).await
    }

    pub async fn undefine(&self, query: &str) -> Result {
        self.run_unit(QueryKind::Undefine, query, Options::new()).await
    }

    pub async fn delete(&self, query: &str) -> Result {
        self.run_unit(QueryKind::Delete, query, Options::new()).await
    }

    pub async fn match_(&self, query: &str) -> Result<Vec<ConceptMap>> {
        self.match_with_options(query, Options::new()).await
    }

    pub async fn match_with_options(&self, query: &str, options: Options) -> Result<Vec<ConceptMap>> {
        self.run_answers(QueryKind::Match, query, options).await
    }

    pub async fn match_aggregate(&self, query: &str) -> Result<Numeric> {
        match self.run(QueryKind::MatchAggregate, query, Options::new()).await? {
            Response::Numeric(numeric) => Ok(numeric),
            _ => Err(ClientError::missing_response("numeric answer")),
        }
    }

    pub async fn insert(&self, query: &str) -> Result<Vec<ConceptMap>> {
        self.run_answers(QueryKind::Insert, query, Options::new()).await
    }

    pub async fn insert_with_options(&self, query: &str, options: Options) -> Result<Vec<ConceptMap>> {
        self.run_answers(QueryKind::Insert, query, options).await
    }

    pub async fn update(&self, query: &str) -> Result<Vec<ConceptMap>> {
        self.run_answers(QueryKind::Update, query, Options::new()).await
    }

    async fn run(&self, kind: QueryKind, query: &str, options: Options) -> Result<Response> {
        self.transaction
            .execute(Request::Query(QueryRequest { kind, query: query.to_string(), options }))
            .await
    }

    async fn run_unit(&self, kind: QueryKind, query: &str, options: Options) -> Result {
        match self.run(kind, query, options).await? {
            Response::Unit => Ok(()),
            _ => Err(ClientError::missing_response("query acknowledgement")),
        }
    }

    async fn run_answers(&self, kind: QueryKind, query: &str, options: Options) -> Result<Vec<ConceptMap>> {
        match self.run(kind, query, options).await? {
            Response::ConceptMaps(answers) => Ok(answers),
            _ => Err(ClientError::missing_response("concept maps")),
        }
    }
}
