use std::collections::HashMap;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::{Client as DynamoDbClient, error::DisplayErrorContext, types::AttributeValue};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// An account as described by the directory table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    /// First entry is the default region
    pub regions: Vec<String>,
    /// Role chain, assumed in order
    pub roles: Vec<String>,
    pub id: Option<i64>,
    pub description: Option<String>,
}

impl Account {
    pub fn primary_region(&self) -> &str {
        // Non-empty by construction, see `parse_item`
        &self.regions[0]
    }

    pub fn is_chained(&self) -> bool {
        self.roles.len() > 1
    }
}

/// Resolves account names to their role chain
#[allow(async_fn_in_trait)]
pub trait AccountDirectory {
    async fn resolve(&self, table: &str, account: &str) -> Result<Account>;
}

/// Directory backed by a DynamoDB table with one item per account
#[derive(Debug, Clone)]
pub struct DynamoDbDirectory {
    client: DynamoDbClient,
}

impl DynamoDbDirectory {
    pub async fn from_profile(profile: &str, region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(profile)
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: DynamoDbClient::new(&config),
        }
    }
}

impl AccountDirectory for DynamoDbDirectory {
    async fn resolve(&self, table: &str, account: &str) -> Result<Account> {
        info!("Looking up account '{}' in table '{}'", account, table);

        // `name` is a DynamoDB reserved word, hence the placeholder
        let mut start_key = None;
        let mut matches = Vec::new();
        loop {
            let page = self
                .client
                .scan()
                .table_name(table)
                .filter_expression("#n = :name")
                .expression_attribute_names("#n", "name")
                .expression_attribute_values(":name", AttributeValue::S(account.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| {
                    Error::Provider(format!(
                        "Failed to scan table {table}: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;

            matches.extend(page.items().iter().cloned());
            match page.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }

        debug!("Table '{}' returned {} item(s) for '{}'", table, matches.len(), account);
        let item = matches.into_iter().next().ok_or_else(|| Error::NotFound {
            table: table.to_string(),
            account: account.to_string(),
        })?;

        parse_item(table, account, &item)
    }
}

/// Turn a raw item into an [`Account`], rejecting items that cannot drive a role chain.
pub fn parse_item(
    table: &str,
    account: &str,
    item: &HashMap<String, AttributeValue>,
) -> Result<Account> {
    let integrity = |reason: String| Error::Integrity {
        table: table.to_string(),
        account: account.to_string(),
        reason,
    };

    let name = match item.get("name") {
        Some(AttributeValue::S(name)) => name.clone(),
        Some(_) => return Err(integrity("attribute 'name' is not a string".to_string())),
        None => return Err(integrity("attribute 'name' is missing".to_string())),
    };

    let roles = string_list(item, "role").map_err(integrity)?;
    if roles.is_empty() {
        return Err(integrity("no roles defined".to_string()));
    }

    let regions = string_list(item, "region").map_err(integrity)?;
    if regions.is_empty() {
        return Err(integrity("no regions defined".to_string()));
    }

    let id = match item.get("id") {
        Some(AttributeValue::N(n)) => Some(
            n.parse::<i64>()
                .map_err(|_| integrity(format!("attribute 'id' is not an integer: {n}")))?,
        ),
        Some(_) => return Err(integrity("attribute 'id' is not a number".to_string())),
        None => None,
    };

    let description = match item.get("description") {
        Some(AttributeValue::S(s)) => Some(s.clone()),
        _ => None,
    };

    Ok(Account {
        name,
        regions,
        roles,
        id,
        description,
    })
}

// Accepts a list of strings or a string set; a missing attribute is an empty list.
fn string_list(
    item: &HashMap<String, AttributeValue>,
    attribute: &str,
) -> std::result::Result<Vec<String>, String> {
    match item.get(attribute) {
        None => Ok(Vec::new()),
        Some(AttributeValue::Ss(values)) => Ok(values.clone()),
        Some(AttributeValue::S(value)) => Ok(vec![value.clone()]),
        Some(AttributeValue::L(values)) => values
            .iter()
            .map(|v| match v {
                AttributeValue::S(s) => Ok(s.clone()),
                _ => Err(format!("attribute '{attribute}' contains a non-string entry")),
            })
            .collect(),
        Some(_) => Err(format!("attribute '{attribute}' is not a list of strings")),
    }
}
