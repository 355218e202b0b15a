//! Contact fields and their projection to and from CRM records.

use crate::error::{SyncError, SyncResult};
use crate::timestamp::parse_sync_timestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Remote field names carried by a contact, in push order.
pub const CONTACT_FIELDS: [&str; 17] = [
    "email1",
    "title",
    "phone_work",
    "phone_home",
    "phone_mobile",
    "phone_fax",
    "department",
    "primary_address_city",
    "primary_address_state",
    "primary_address_postalcode",
    "primary_address_country",
    "primary_address_street",
    "description",
    "last_name",
    "first_name",
    "account_name",
    "salutation",
];

/// The mapped attributes of a contact.
///
/// Each field is named after its remote counterpart. Absent values are
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactFields {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Courtesy title, e.g. "Dr.".
    pub salutation: String,
    /// Primary e-mail address.
    pub email1: String,
    /// Job title.
    pub title: String,
    /// Department.
    pub department: String,
    /// Company.
    pub account_name: String,
    /// Business phone.
    pub phone_work: String,
    /// Home phone.
    pub phone_home: String,
    /// Mobile phone.
    pub phone_mobile: String,
    /// Business fax.
    pub phone_fax: String,
    /// Business address street.
    pub primary_address_street: String,
    /// Business address city.
    pub primary_address_city: String,
    /// Business address state or region.
    pub primary_address_state: String,
    /// Business address postal code.
    pub primary_address_postalcode: String,
    /// Business address country.
    pub primary_address_country: String,
    /// Free-text notes.
    pub description: String,
}

impl ContactFields {
    /// Returns a field by its remote name.
    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "first_name" => &self.first_name,
            "last_name" => &self.last_name,
            "salutation" => &self.salutation,
            "email1" => &self.email1,
            "title" => &self.title,
            "department" => &self.department,
            "account_name" => &self.account_name,
            "phone_work" => &self.phone_work,
            "phone_home" => &self.phone_home,
            "phone_mobile" => &self.phone_mobile,
            "phone_fax" => &self.phone_fax,
            "primary_address_street" => &self.primary_address_street,
            "primary_address_city" => &self.primary_address_city,
            "primary_address_state" => &self.primary_address_state,
            "primary_address_postalcode" => &self.primary_address_postalcode,
            "primary_address_country" => &self.primary_address_country,
            "description" => &self.description,
            _ => return None,
        };
        Some(value)
    }

    /// Sets a field by its remote name. Returns false for unmapped names.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        let slot = match name {
            "first_name" => &mut self.first_name,
            "last_name" => &mut self.last_name,
            "salutation" => &mut self.salutation,
            "email1" => &mut self.email1,
            "title" => &mut self.title,
            "department" => &mut self.department,
            "account_name" => &mut self.account_name,
            "phone_work" => &mut self.phone_work,
            "phone_home" => &mut self.phone_home,
            "phone_mobile" => &mut self.phone_mobile,
            "phone_fax" => &mut self.phone_fax,
            "primary_address_street" => &mut self.primary_address_street,
            "primary_address_city" => &mut self.primary_address_city,
            "primary_address_state" => &mut self.primary_address_state,
            "primary_address_postalcode" => &mut self.primary_address_postalcode,
            "primary_address_country" => &mut self.primary_address_country,
            "description" => &mut self.description,
            _ => return false,
        };
        *slot = value.into();
        true
    }

    /// Builds the ordered field list sent to the CRM.
    pub fn to_field_list(&self) -> FieldList {
        let mut list = FieldList::new();
        for name in CONTACT_FIELDS {
            list.push(name, self.get(name).unwrap_or_default());
        }
        list
    }

    /// Copies every mapped field present in `list` onto `self`.
    pub fn apply_field_list(&mut self, list: &FieldList) {
        for pair in list.iter() {
            self.set(&pair.name, pair.value.as_str());
        }
    }

    /// A display name for logs.
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            _ => self.last_name.clone(),
        }
    }
}

/// One `name = value` pair of a create-or-update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    /// Remote field name.
    pub name: String,
    /// Field value.
    pub value: String,
}

/// Ordered field list submitted to the CRM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldList(Vec<NameValue>);

impl FieldList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a pair.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(NameValue {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Returns the value of the first pair with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|pair| pair.name == name)
            .map(|pair| pair.value.as_str())
    }

    /// Iterates pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = &NameValue> {
        self.0.iter()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the list has no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A contact record as listed by the CRM, parsed into typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContact {
    /// Remote identity.
    pub id: String,
    /// Remote modification time, `yyyy-MM-dd HH:mm:ss`, compared verbatim.
    pub date_modified: String,
    /// The record's "sync to local" opt-in flag.
    #[serde(default)]
    pub sync_contact: bool,
    /// Mapped attributes.
    #[serde(flatten)]
    pub fields: ContactFields,
}

impl RemoteContact {
    /// Parses `date_modified`.
    pub fn modified_at(&self) -> SyncResult<NaiveDateTime> {
        parse_sync_timestamp(&self.date_modified)
    }
}

/// A raw record from a listing page, before parsing.
///
/// Accepts either a bare name/value map or an entry wrapping one under
/// `name_value_list`. Cells may be `{"name": .., "value": ..}` objects or
/// bare scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteEntry(serde_json::Value);

impl RemoteEntry {
    /// Wraps a raw JSON payload.
    pub fn new(raw: serde_json::Value) -> Self {
        Self(raw)
    }

    /// Builds the wire form of a typed contact.
    pub fn from_contact(contact: &RemoteContact) -> Self {
        let mut map = serde_json::Map::new();
        let mut insert = |name: &str, value: serde_json::Value| {
            map.insert(
                name.to_owned(),
                serde_json::json!({ "name": name, "value": value }),
            );
        };
        insert("id", contact.id.clone().into());
        insert("date_modified", contact.date_modified.clone().into());
        insert(
            "sync_contact",
            (if contact.sync_contact { "True" } else { "False" }).into(),
        );
        for name in CONTACT_FIELDS {
            insert(name, contact.fields.get(name).unwrap_or_default().into());
        }
        Self(serde_json::json!({ "name_value_list": map }))
    }

    /// The raw payload.
    pub fn raw(&self) -> &serde_json::Value {
        &self.0
    }

    fn name_values(&self) -> &serde_json::Value {
        match self.0.get("name_value_list") {
            Some(inner) if inner.is_object() => inner,
            _ => &self.0,
        }
    }

    /// Reads the remote id without parsing the rest of the record.
    pub fn id_hint(&self) -> Option<String> {
        let cell = self.name_values().get("id")?.clone();
        let id = serde_json::from_value::<Cell>(cell).ok()?.into_text();
        (!id.is_empty()).then_some(id)
    }

    /// Parses the record into a [`RemoteContact`].
    ///
    /// Missing or null mapped fields become empty strings. A missing `id`
    /// or `date_modified` is a [`SyncError::MalformedRecord`].
    pub fn parse(&self) -> SyncResult<RemoteContact> {
        let id_hint = self.id_hint();
        let entry: ContactEntry = serde_json::from_value(self.name_values().clone())
            .map_err(|e| SyncError::malformed(id_hint.as_deref(), e.to_string()))?;

        let id = text(entry.id);
        if id.is_empty() {
            return Err(SyncError::malformed(None, "missing id"));
        }
        let date_modified = text(entry.date_modified);
        if date_modified.is_empty() {
            return Err(SyncError::malformed(Some(&id), "missing date_modified"));
        }
        let sync_contact = matches!(
            text(entry.sync_contact).to_ascii_lowercase().as_str(),
            "true" | "1"
        );

        Ok(RemoteContact {
            id,
            date_modified,
            sync_contact,
            fields: ContactFields {
                first_name: text(entry.first_name),
                last_name: text(entry.last_name),
                salutation: text(entry.salutation),
                email1: text(entry.email1),
                title: text(entry.title),
                department: text(entry.department),
                account_name: text(entry.account_name),
                phone_work: text(entry.phone_work),
                phone_home: text(entry.phone_home),
                phone_mobile: text(entry.phone_mobile),
                phone_fax: text(entry.phone_fax),
                primary_address_street: text(entry.primary_address_street),
                primary_address_city: text(entry.primary_address_city),
                primary_address_state: text(entry.primary_address_state),
                primary_address_postalcode: text(entry.primary_address_postalcode),
                primary_address_country: text(entry.primary_address_country),
                description: text(entry.description),
            },
        })
    }
}

/// The name/value map of a contact record as the CRM lists it.
#[derive(Debug, Deserialize)]
struct ContactEntry {
    #[serde(default)]
    id: Option<Cell>,
    #[serde(default)]
    date_modified: Option<Cell>,
    #[serde(default)]
    sync_contact: Option<Cell>,
    #[serde(default)]
    first_name: Option<Cell>,
    #[serde(default)]
    last_name: Option<Cell>,
    #[serde(default)]
    salutation: Option<Cell>,
    #[serde(default)]
    email1: Option<Cell>,
    #[serde(default)]
    title: Option<Cell>,
    #[serde(default)]
    department: Option<Cell>,
    #[serde(default)]
    account_name: Option<Cell>,
    #[serde(default)]
    phone_work: Option<Cell>,
    #[serde(default)]
    phone_home: Option<Cell>,
    #[serde(default)]
    phone_mobile: Option<Cell>,
    #[serde(default)]
    phone_fax: Option<Cell>,
    #[serde(default)]
    primary_address_street: Option<Cell>,
    #[serde(default)]
    primary_address_city: Option<Cell>,
    #[serde(default)]
    primary_address_state: Option<Cell>,
    #[serde(default)]
    primary_address_postalcode: Option<Cell>,
    #[serde(default)]
    primary_address_country: Option<Cell>,
    #[serde(default)]
    description: Option<Cell>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Cell {
    Wrapped {
        #[serde(default)]
        value: Option<Scalar>,
    },
    Bare(Option<Scalar>),
}

impl Cell {
    fn into_text(self) -> String {
        match self {
            Cell::Wrapped { value } | Cell::Bare(value) => {
                value.map(Scalar::into_text).unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
            Scalar::Flag(flag) => (if flag { "True" } else { "False" }).to_owned(),
        }
    }
}

fn text(cell: Option<Cell>) -> String {
    cell.map(Cell::into_text).unwrap_or_default()
}
