use serde::{Deserialize, Serialize};


//------------ Team ----------------------------------------------------------

/// A row of `public.teams`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Team {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub team_code: String,
    #[serde(rename = "desc")]
    pub description: String,
    pub deleted: bool,
}
