//! Query execution with page accumulation.
//!
//! A query may come back in several pages. Pages are requested strictly one
//! after another and their records concatenated in arrival order; only the
//! final page is returned, carrying every record and `total_size` equal to
//! the record count. Any page error aborts the whole run.

use anyhow::Result;
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

use crate::client::{ApiSession, ClientError, QueryPage};
use crate::host::FlowMessage;
use crate::validation::{UnknownProcessor, ValidationError};


/// Which query endpoint to use. Both paginate the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueryApi {
    #[default]
    Soql,
    Tooling,
}

impl FromStr for QueryApi {
    type Err = UnknownProcessor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soql" => Ok(QueryApi::Soql),
            "tooling" => Ok(QueryApi::Tooling),
            other => Err(UnknownProcessor::new("query", other)),
        }
    }
}

impl QueryApi {
    async fn first_page(self, session: &dyn ApiSession, soql: &str) -> Result<QueryPage, ClientError> {
        match self {
            QueryApi::Soql => session.query(soql).await,
            QueryApi::Tooling => session.tooling_query(soql).await,
        }
    }

    async fn next_page(self, session: &dyn ApiSession, cursor: &str) -> Result<QueryPage, ClientError> {
        match self {
            QueryApi::Soql => session.query_more(cursor).await,
            QueryApi::Tooling => session.tooling_query_more(cursor).await,
        }
    }
}

/// Runs `soql` and follows continuation cursors until the last page.
pub async fn execute_query(
    api: QueryApi,
    session: &dyn ApiSession,
    soql: &str,
) -> Result<QueryPage, ClientError> {
    let mut records: Vec<Value> = Vec::new();
    let mut page = api.first_page(session, soql).await?;
    let mut pages = 1usize;

    loop {
        records.append(&mut page.records);
        if page.done {
            break;
        }
        let Some(cursor) = page.next_records_url.take() else {
            return Err(ClientError::Decode(
                "query page is not done but carries no nextRecordsUrl".to_string(),
            ));
        };
        debug!(api = ?api, page = pages, accumulated = records.len(), "Fetching next page");
        page = api.next_page(session, &cursor).await?;
        pages += 1;
    }

    debug!(api = ?api, pages, total = records.len(), "Query complete");
    page.total_size = records.len() as u64;
    page.records = records;
    Ok(page)
}

/// Validated query request for one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub api: QueryApi,
    pub query: String,
    pub target: String,
}

impl QueryRequest {
    pub fn new(api: QueryApi, query: Option<String>, target: &str) -> Result<Self, ValidationError> {
        let query = query
            .filter(|q| !q.trim().is_empty())
            .ok_or(ValidationError::MissingQuery)?;
        if target.trim().is_empty() {
            return Err(ValidationError::MissingTarget);
        }
        Ok(Self {
            api,
            query,
            target: target.to_string(),
        })
    }

    /// Runs the query and writes the combined page at `target` on `msg`.
    pub async fn execute_into(&self, session: &dyn ApiSession, msg: &mut FlowMessage) -> Result<()> {
        let page = execute_query(self.api, session, &self.query).await?;
        msg.set_property(&self.target, serde_json::to_value(page)?)?;
        Ok(())
    }
}
