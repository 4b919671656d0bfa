//! Rule façade and remote rule handle

use super::Transaction;
use crate::concept::Rule;
use crate::types::{ClientError, Result};
use crate::wire::{LogicRequest, Request, Response, RuleOp};

/// Reads and writes rules within one transaction
pub struct LogicManager<'a> {
    transaction: &'a Transaction,
}

impl<'a> LogicManager<'a> {
    pub(crate) fn new(transaction: &'a Transaction) -> Self {
        Self { transaction }
    }

    pub async fn get_rule(&self, label: &str) -> Result<Option<Rule>> {
        match self.execute(LogicRequest::GetRule { label: label.to_string() }).await? {
            Response::Rule(rule) => Ok(rule),
            _ => Err(ClientError::missing_response("rule")),
        }
    }

    pub async fn get_rules(&self) -> Result<Vec<Rule>> {
        match self.execute(LogicRequest::GetRules).await? {
            Response::Rules(rules) => Ok(rules),
            _ => Err(ClientError::missing_response("rules")),
        }
    }

    pub async fn put_rule(&self, label: &str, when: &str, then: &str) -> Result<Rule> {
        let request = LogicRequest::PutRule {
            label: label.to_string(),
            when: when.to_string(),
            then: then.to_string(),
        };
        match self.execute(request).await? {
            Response::Rule(Some(rule)) => Ok(rule),
            _ => Err(ClientError::missing_response("rule")),
        }
    }

    pub fn remote(&self, rule: &Rule) -> RemoteRule<'a> {
        RemoteRule { transaction: self.transaction, rule: rule.clone() }
    }

    async fn execute(&self, request: LogicRequest) -> Result<Response> {
        self.transaction.execute(Request::Logic(request)).await
    }
}

/// Rule operations that require the server
pub struct RemoteRule<'a> {
    transaction: &'a Transaction,
    rule: Rule,
}

impl RemoteRule<'_> {
    pub fn label(&self) -> &str {
        &self.rule.label
    }

    pub fn when(&self) -> &str {
        &self.rule.when
    }

    pub fn then(&self) -> &str {
        &self.rule.then
    }

    pub async fn set_label(&mut self, new_label: &str) -> Result {
        self.op(RuleOp::SetLabel { new_label: new_label.to_string() }).await?;
        self.rule.label = new_label.to_string();
        Ok(())
    }

    pub async fn delete(&self) -> Result {
        self.op(RuleOp::Delete).await
    }

    pub async fn is_deleted(&self) -> Result<bool> {
        let current = LogicManager::new(self.transaction).get_rule(&self.rule.label).await?;
        Ok(current.is_none())
    }

    async fn op(&self, op: RuleOp) -> Result {
        let request = LogicRequest::Rule { label: self.rule.label.clone(), op };
        match self.transaction.execute(Request::Logic(request)).await? {
            Response::Unit => Ok(()),
            _ => Err(ClientError::missing_response("acknowledgement")),
        }
    }
}
