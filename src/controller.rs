//! View state for the admin screens.
//!
//! The view binds to the public fields and calls the methods on user
//! actions. Every mutation goes through the [`StorageAdapter`] and, when it
//! succeeds, re-reads the affected listing; nothing is patched locally. A
//! failure is logged and shown through `last_error`, and leaves the rest of
//! the state as it was.

use serde_json::Value;

use crate::{
    adapter::StorageAdapter,
    backend::Backend,
    error::{Error, Result},
    schema::{DatabaseInfo, FieldIndex, Record, TableInfo},
};

/// What the confirmation dialog is about to delete.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Database(String),
    Table(String),
    /// A record of the selected record table, by primary key.
    Record(Value),
}

/// State of the record form.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RecordForm {
    #[default]
    Idle,
    Creating,
    /// Editing the record stored under `key`. The key itself is not one of
    /// the editable rows.
    Editing { key: Value },
}

/// One name/value row of the record form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordRow {
    pub name: String,
    pub value: String,
}

impl RecordRow {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        RecordRow {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Strings are shown bare unless the bare text would read back as
    /// something else (`"123"`, `"true"`), in which case they stay quoted.
    fn from_field(name: &str, value: &Value) -> Self {
        let text = match value {
            Value::String(s) if serde_json::from_str::<Value>(s).is_err() => s.clone(),
            other => other.to_string(),
        };
        RecordRow::new(name, text)
    }

    /// The typed value of the row: JSON when the text parses as JSON
    /// (`5`, `true`, `"quoted"`), the raw text otherwise.
    pub fn parsed_value(&self) -> Value {
        serde_json::from_str(&self.value).unwrap_or_else(|_| Value::String(self.value.clone()))
    }
}

fn no_selection(what: &str) -> Error {
    Error::NotFound(format!("no {what} selected"))
}

pub struct FormController<B> {
    adapter: StorageAdapter<B>,

    pub db_name: String,
    pub db_version: String,
    pub database_list: Vec<DatabaseInfo>,

    pub selected_database: Option<String>,
    pub table_name: String,
    pub primary_key: String,
    pub field_rows: Vec<FieldIndex>,
    pub table_list: Vec<String>,

    pub selected_record_database: Option<String>,
    pub selected_record_table: Option<String>,
    pub record_table_list: Vec<String>,
    pub record_table: Option<TableInfo>,
    pub record_list: Vec<Record>,
    pub record_rows: Vec<RecordRow>,
    pub record_form: RecordForm,

    pub pending_delete: Option<DeleteTarget>,
    pub last_error: Option<String>,
}

impl<B: Backend> FormController<B> {
    pub fn new(backend: B) -> Self {
        FormController {
            adapter: StorageAdapter::new(backend),
            db_name: String::new(),
            db_version: String::new(),
            database_list: Vec::new(),
            selected_database: None,
            table_name: String::new(),
            primary_key: String::new(),
            field_rows: vec![FieldIndex::default()],
            table_list: Vec::new(),
            selected_record_database: None,
            selected_record_table: None,
            record_table_list: Vec::new(),
            record_table: None,
            record_list: Vec::new(),
            record_rows: vec![RecordRow::default()],
            record_form: RecordForm::Idle,
            pending_delete: None,
            last_error: None,
        }
    }

    /// Loads the database list.
    pub async fn init(&mut self) {
        self.refresh_databases().await;
    }

    fn report<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(e) => {
                log::error!("{e}");
                self.last_error = Some(e.to_string());
                None
            }
        }
    }

    pub async fn refresh_databases(&mut self) {
        let result = self.adapter.list_databases().await;
        if let Some(list) = self.report(result) {
            self.database_list = list;
        }
    }

    /// Creates the database named in the form at the version typed in it.
    pub async fn create_database(&mut self) {
        let version = self.db_version.trim().parse::<u32>().map_err(|_| {
            Error::Connection(format!("\"{}\" is not a valid version", self.db_version))
        });
        let result = match version {
            Ok(version) => self.adapter.create_database(&self.db_name, version).await,
            Err(e) => Err(e),
        };

        if self.report(result).is_some() {
            self.db_name.clear();
            self.db_version.clear();
            self.refresh_databases().await;
        }
    }

    pub async fn select_database(&mut self, name: Option<String>) {
        self.selected_database = name;
        self.table_list.clear();
        self.refresh_tables().await;
    }

    pub async fn refresh_tables(&mut self) {
        let Some(db) = self.selected_database.clone() else {
            return;
        };
        let result = self.adapter.list_tables(&db).await;
        if let Some(tables) = self.report(result) {
            self.table_list = tables;
        }
    }

    /// Adds an empty field row to the table form once a database is chosen.
    pub fn add_field_row(&mut self) {
        if self.selected_database.is_some() {
            self.field_rows.push(FieldIndex::default());
        }
    }

    /// Creates the table described by the form in the selected database.
    pub async fn create_table(&mut self) {
        let result = match &self.selected_database {
            Some(db) => {
                self.adapter
                    .add_table(
                        db,
                        &self.table_name,
                        self.primary_key.trim(),
                        &self.field_rows,
                    )
                    .await
            }
            None => Err(no_selection("database")),
        };

        if self.report(result).is_some() {
            self.table_name.clear();
            self.primary_key.clear();
            self.field_rows = vec![FieldIndex::default()];
            self.refresh_tables().await;
            self.refresh_databases().await;
        }
    }

    pub async fn select_record_database(&mut self, name: Option<String>) {
        self.selected_record_database = name;
        self.selected_record_table = None;
        self.record_table_list.clear();
        self.record_table = None;
        self.record_list.clear();
        self.reset_record_form();

        let Some(db) = self.selected_record_database.clone() else {
            return;
        };
        let result = self.adapter.list_tables(&db).await;
        if let Some(tables) = self.report(result) {
            self.record_table_list = tables;
        }
    }

    pub async fn select_record_table(&mut self, name: Option<String>) {
        self.selected_record_table = name;
        self.record_table = None;
        self.record_list.clear();
        self.reset_record_form();
        self.refresh_records().await;
    }

    pub async fn refresh_records(&mut self) {
        let (Some(db), Some(table)) = (
            self.selected_record_database.clone(),
            self.selected_record_table.clone(),
        ) else {
            return;
        };

        let result = self.adapter.describe_table(&db, &table).await;
        let Some(info) = self.report(result) else {
            return;
        };
        let result = self.adapter.list_records(&db, &table).await;
        if let Some(records) = self.report(result) {
            self.record_table = Some(info);
            self.record_list = records;
        }
    }

    fn record_table_selected(&self) -> bool {
        self.selected_record_database.is_some() && self.selected_record_table.is_some()
    }

    fn reset_record_form(&mut self) {
        self.record_rows = vec![RecordRow::default()];
        self.record_form = RecordForm::Idle;
    }

    /// Starts entering a new record with a single empty row.
    pub fn begin_create_record(&mut self) {
        if self.record_table_selected() {
            self.record_rows = vec![RecordRow::default()];
            self.record_form = RecordForm::Creating;
        }
    }

    pub fn add_record_row(&mut self) {
        if self.record_table_selected() {
            self.record_rows.push(RecordRow::default());
        }
    }

    /// Fills the record form from `record`, one row per field, keeping its
    /// primary key aside. Records of a table without a key path carry no
    /// key and cannot be edited here.
    pub fn edit_record(&mut self, record: &Record) {
        let key = match &self.record_table {
            Some(info) => info.key_path.extract(record).ok_or_else(|| {
                Error::NotFound(format!("record has no key at {:?}", info.key_path))
            }),
            None => Err(no_selection("table")),
        };
        let Some(key) = self.report(key) else {
            return;
        };

        let key_path = self.record_table.as_ref().map(|info| info.key_path.clone());
        self.record_rows = record
            .iter()
            .filter(|(name, _)| !key_path.as_ref().is_some_and(|path| path.contains(name)))
            .map(|(name, value)| RecordRow::from_field(name, value))
            .collect();
        self.record_form = RecordForm::Editing { key };
    }

    fn rows_to_record(&self) -> Record {
        self.record_rows
            .iter()
            .filter(|row| !row.name.is_empty())
            .map(|row| (row.name.clone(), row.parsed_value()))
            .collect()
    }

    /// Writes the record form: an upsert when creating, a merge of the
    /// edited rows when editing.
    pub async fn submit_record(&mut self) {
        let (Some(db), Some(table)) = (
            self.selected_record_database.clone(),
            self.selected_record_table.clone(),
        ) else {
            let result: Result<()> = Err(no_selection("table"));
            self.report(result);
            return;
        };

        let record = self.rows_to_record();
        let result = match &self.record_form {
            RecordForm::Editing { key } => self
                .adapter
                .update_record(&db, &table, key, &record)
                .await
                .map(drop),
            RecordForm::Idle | RecordForm::Creating => self
                .adapter
                .create_record(&db, &table, &record)
                .await
                .map(drop),
        };

        if self.report(result).is_some() {
            self.reset_record_form();
            self.refresh_records().await;
        }
    }

    /// Opens the confirmation dialog for `target`.
    pub fn request_delete(&mut self, target: DeleteTarget) {
        self.pending_delete = Some(target);
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Deletes the pending target. The dialog stays open if this fails.
    pub async fn confirm_delete(&mut self) {
        let Some(target) = self.pending_delete.take() else {
            return;
        };

        let result = match &target {
            DeleteTarget::Database(name) => self.adapter.delete_database(name).await,
            DeleteTarget::Table(name) => match &self.selected_database {
                Some(db) => self.adapter.remove_table(db, name).await.map(drop),
                None => Err(no_selection("database")),
            },
            DeleteTarget::Record(key) => {
                match (&self.selected_record_database, &self.selected_record_table) {
                    (Some(db), Some(table)) => self.adapter.delete_record(db, table, key).await,
                    _ => Err(no_selection("table")),
                }
            }
        };

        if self.report(result).is_none() {
            self.pending_delete = Some(target);
            return;
        }

        match target {
            DeleteTarget::Database(name) => {
                if self.selected_database.as_ref() == Some(&name) {
                    self.selected_database = None;
                    self.table_list.clear();
                }
                if self.selected_record_database.as_ref() == Some(&name) {
                    self.select_record_database(None).await;
                }
                self.refresh_databases().await;
            }
            DeleteTarget::Table(name) => {
                if self.selected_record_database == self.selected_database
                    && self.selected_record_table.as_ref() == Some(&name)
                {
                    self.select_record_table(None).await;
                }
                self.refresh_tables().await;
                self.refresh_databases().await;
            }
            DeleteTarget::Record(_) => self.refresh_records().await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DeleteTarget, FormController, RecordForm, RecordRow};
    use crate::{memory::MemoryBackend, schema::FieldIndex};
    use futures::executor::block_on;
    use serde_json::{json, Value};

    fn controller() -> FormController<MemoryBackend> {
        FormController::new(MemoryBackend::new())
    }

    async fn with_items_table(form: &mut FormController<MemoryBackend>) {
        form.db_name = "shop".to_owned();
        form.db_version = "1".to_owned();
        form.create_database().await;

        form.select_database(Some("shop".to_owned())).await;
        form.table_name = "items".to_owned();
        form.primary_key = "id".to_owned();
        form.field_rows = vec![FieldIndex::new("sku").unique()];
        form.create_table().await;

        form.select_record_database(Some("shop".to_owned())).await;
        form.select_record_table(Some("items".to_owned())).await;
    }

    #[test]
    fn row_values_are_typed() {
        assert_eq!(RecordRow::new("qty", "5").parsed_value(), json!(5));
        assert_eq!(RecordRow::new("ok", "true").parsed_value(), json!(true));
        assert_eq!(RecordRow::new("sku", "A1").parsed_value(), json!("A1"));
        assert_eq!(RecordRow::new("s", "\"5\"").parsed_value(), json!("5"));
    }

    #[test]
    fn create_database_refreshes_list() {
        let mut form = controller();
        block_on(async {
            form.init().await;
            assert!(form.database_list.is_empty());

            form.db_name = "shop".to_owned();
            form.db_version = "2".to_owned();
            form.create_database().await;

            assert_eq!(form.last_error, None);
            assert!(form.db_name.is_empty());
            assert!(form.db_version.is_empty());
            assert_eq!(form.database_list.len(), 1);
            assert_eq!(form.database_list[0].version, 2);
        });
    }

    #[test]
    fn invalid_version_keeps_form() {
        let mut form = controller();
        block_on(async {
            form.db_name = "shop".to_owned();
            form.db_version = "two".to_owned();
            form.create_database().await;

            assert!(form.last_error.is_some());
            assert_eq!(form.db_name, "shop");
            assert!(form.database_list.is_empty());
        });
    }

    #[test]
    fn field_rows_need_a_database() {
        let mut form = controller();
        form.add_field_row();
        assert_eq!(form.field_rows.len(), 1);

        block_on(form.select_database(Some("shop".to_owned())));
        form.add_field_row();
        assert_eq!(form.field_rows.len(), 2);
    }

    #[test]
    fn create_table_resets_form() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            assert_eq!(form.last_error, None);
            assert_eq!(form.table_list, vec!["items".to_owned()]);
            assert!(form.table_name.is_empty());
            assert_eq!(form.field_rows, vec![FieldIndex::default()]);
            assert_eq!(form.database_list[0].version, 2);
            assert_eq!(form.record_table_list, vec!["items".to_owned()]);
        });
    }

    #[test]
    fn duplicate_table_is_reported() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            form.table_name = "items".to_owned();
            form.primary_key = "id".to_owned();
            form.create_table().await;

            let error = form.last_error.clone().unwrap();
            assert!(error.contains("duplicate table name"), "{error}");
            assert_eq!(form.table_name, "items");
            assert_eq!(form.table_list, vec!["items".to_owned()]);
        });
    }

    #[test]
    fn create_then_edit_record() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            form.begin_create_record();
            assert_eq!(form.record_form, RecordForm::Creating);
            form.record_rows = vec![RecordRow::new("sku", "A1"), RecordRow::new("qty", "5")];
            form.submit_record().await;

            assert_eq!(form.last_error, None);
            assert_eq!(form.record_form, RecordForm::Idle);
            assert_eq!(form.record_list.len(), 1);
            let record = form.record_list[0].clone();
            assert_eq!(
                Value::Object(record.clone()),
                json!({"id": 1, "sku": "A1", "qty": 5})
            );

            form.edit_record(&record);
            assert_eq!(form.record_form, RecordForm::Editing { key: json!(1) });
            assert_eq!(
                form.record_rows,
                vec![RecordRow::new("qty", "5"), RecordRow::new("sku", "A1")]
            );

            form.record_rows = vec![RecordRow::new("qty", "9")];
            form.submit_record().await;

            assert_eq!(form.last_error, None);
            assert_eq!(form.record_form, RecordForm::Idle);
            assert_eq!(
                Value::Object(form.record_list[0].clone()),
                json!({"id": 1, "sku": "A1", "qty": 9})
            );
        });
    }

    #[test]
    fn editing_keeps_untouched_strings() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            form.begin_create_record();
            form.record_rows = vec![
                RecordRow::new("zip", "\"123\""),
                RecordRow::new("flag", "\"true\""),
                RecordRow::new("qty", "5"),
            ];
            form.submit_record().await;
            let record = form.record_list[0].clone();
            assert_eq!(record.get("zip"), Some(&json!("123")));

            form.edit_record(&record);
            assert!(form.record_rows.contains(&RecordRow::new("zip", "\"123\"")));
            for row in &mut form.record_rows {
                if row.name == "qty" {
                    row.value = "6".to_owned();
                }
            }
            form.submit_record().await;

            assert_eq!(form.last_error, None);
            assert_eq!(
                Value::Object(form.record_list[0].clone()),
                json!({"id": 1, "zip": "123", "flag": "true", "qty": 6})
            );
        });
    }

    #[test]
    fn blank_primary_key_is_rejected() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            form.table_name = "orders".to_owned();
            form.primary_key = "  ".to_owned();
            form.create_table().await;

            assert!(form.last_error.is_some());
            assert_eq!(form.table_name, "orders");
            assert_eq!(form.table_list, vec!["items".to_owned()]);
            assert_eq!(form.database_list[0].version, 2);
        });
    }

    #[test]
    fn unique_violation_is_reported() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            for _ in 0..2 {
                form.begin_create_record();
                form.record_rows = vec![RecordRow::new("sku", "A1")];
                form.submit_record().await;
            }

            assert!(form.last_error.is_some());
            assert_eq!(form.record_list.len(), 1);
            assert_eq!(form.record_form, RecordForm::Creating);
        });
    }

    #[test]
    fn delete_flow() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;
            form.record_rows = vec![RecordRow::new("sku", "A1")];
            form.submit_record().await;

            form.request_delete(DeleteTarget::Record(json!(1)));
            form.cancel_delete();
            assert_eq!(form.pending_delete, None);

            form.request_delete(DeleteTarget::Record(json!(1)));
            form.confirm_delete().await;
            assert_eq!(form.pending_delete, None);
            assert!(form.record_list.is_empty());

            form.request_delete(DeleteTarget::Table("items".to_owned()));
            form.confirm_delete().await;
            assert!(form.table_list.is_empty());
            assert_eq!(form.selected_record_table, None);
            assert_eq!(form.database_list[0].version, 3);

            form.request_delete(DeleteTarget::Database("shop".to_owned()));
            form.confirm_delete().await;
            assert_eq!(form.last_error, None);
            assert!(form.database_list.is_empty());
            assert_eq!(form.selected_database, None);
        });
    }

    #[test]
    fn failed_delete_keeps_dialog_open() {
        let mut form = controller();
        block_on(async {
            with_items_table(&mut form).await;

            form.request_delete(DeleteTarget::Table("missing".to_owned()));
            form.confirm_delete().await;

            assert!(form.last_error.is_some());
            assert_eq!(
                form.pending_delete,
                Some(DeleteTarget::Table("missing".to_owned()))
            );
            assert_eq!(form.table_list, vec!["items".to_owned()]);
        });
    }
}
