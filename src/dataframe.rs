use reqwest::Method;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::table::DataFrame;

/// Remote storage of [`DataFrame`]s.
#[derive(Debug, Clone)]
pub struct DataFrameHelper<'a> {
    client: &'a Client,
}

impl<'a> DataFrameHelper<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub fn all(&self) -> Result<Vec<DataFrame>> {
        let list = self
            .client
            .request_json(Method::GET, self.collection_url(), None)?;
        decode(list)
    }

    pub fn get(&self, id: Uuid) -> Result<DataFrame> {
        let url = self.item_url(id);
        decode(self.client.request_json(Method::GET, &url, None)?)
    }

    /// Creates the dataframe remotely when it has no id, updates it otherwise.
    /// A newly created dataframe takes the id assigned by the server.
    pub fn save(&self, df: &mut DataFrame) -> Result<()> {
        let mut body = serde_json::to_value(&*df)?;
        if let Value::Object(map) = &mut body {
            map.insert("data_type".to_string(), Value::from("json"));
        }

        let reply = match df.id {
            Some(id) => self
                .client
                .request_json(Method::PUT, &self.item_url(id), Some(body))?,
            None => self
                .client
                .request_json(Method::POST, self.collection_url(), Some(body))?,
        };

        if let Some(id) = reply
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            df.id = Some(id);
        }
        if df.id.is_none() {
            return Err(Error::UnexpectedResponse(
                "saved dataframe came back without an id".to_string(),
            ));
        }

        info!(name = %df.name, id = ?df.id, "dataframe saved");
        Ok(())
    }

    /// Deletes the remote copy and clears `df.id`. The local rows are untouched.
    pub fn delete(&self, df: &mut DataFrame) -> Result<()> {
        let id = df
            .id
            .ok_or_else(|| Error::InvalidInput("dataframe has not been saved".to_string()))?;
        self.client
            .request_json(Method::DELETE, &self.item_url(id), None)?;
        df.id = None;
        Ok(())
    }

    fn collection_url(&self) -> &str {
        &self.client.endpoints().dataframes
    }

    fn item_url(&self, id: Uuid) -> String {
        format!("{}/{}/", self.collection_url().trim_end_matches('/'), id)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::UnexpectedResponse(format!("invalid dataframe payload: {e}")))
}
