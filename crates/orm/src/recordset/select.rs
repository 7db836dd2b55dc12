//! SELECT

use super::{Pending, RecordSet};
use crate::error::{ModelError, OrmResult};
use crate::property::RelationKind;
use crate::record::Record;
use crate::recordset::pending::PendingSelect;
use crate::search::{Limit, OrderBy, Where};

impl RecordSet {
    /// Add the rows matching `filter` to the set.
    ///
    /// Rows already present are kept as they are, so selecting twice is
    /// harmless. On a related set the selected rows are also linked to the
    /// parent record.
    pub fn select(&self, filter: impl Into<Where>) -> OrmResult<RecordSet> {
        self.select_with(filter, &[], None)
    }

    pub fn select_with(
        &self,
        filter: impl Into<Where>,
        order: &[OrderBy],
        limit: Option<Limit>,
    ) -> OrmResult<RecordSet> {
        let pending = self.select_pending(filter.into(), order, limit.as_ref())?;
        if !pending.is_empty() {
            return Err(ModelError::Relationship(format!(
                "cannot select into '{}' while its parent record is being inserted",
                self.model_name()
            )));
        }
        Ok(self.clone())
    }

    pub(crate) fn select_pending(
        &self,
        filter: Where,
        order: &[OrderBy],
        limit: Option<&Limit>,
    ) -> OrmResult<Vec<Pending>> {
        let link = self.parent_link();
        if link.is_some() && filter.is_unrestricted() {
            return Err(ModelError::Query(format!(
                "selecting every '{}' row into a related set needs a filter",
                self.model_name()
            )));
        }

        let db = self.db();
        let backbone = self.backbone();
        let search = filter.into_search();
        let statement = db.builder().select(backbone.name(), search.as_ref(), order, limit)?;

        let mut selected = Vec::new();
        for row in db.fetch_all(&statement)? {
            let record = Record::from_row(&row);
            match record.id() {
                Some(id) if self.contains_id(id) => selected.push(id),
                Some(id) => {
                    selected.push(id);
                    self.push(record);
                }
                None => self.push(record),
            }
        }

        if link.map_or(false, |l| l.is_inserting()) {
            return Ok(vec![Pending::Select(PendingSelect {
                set: self.clone(),
                ids: selected,
            })]);
        }
        self.reconcile_selected(&selected)?;
        Ok(Vec::new())
    }

    /// Point selected rows at the parent: set the back reference for
    /// one-to-many, add junction rows for many-to-many
    pub(crate) fn reconcile_selected(&self, ids: &[i64]) -> OrmResult<()> {
        let (link, kind) = match self.relation() {
            Some(relation) if !ids.is_empty() => relation,
            _ => return Ok(()),
        };
        match kind {
            RelationKind::OneToMany => {
                let field = link.property().target_property()?.to_string();
                let targets: Vec<Record> = self
                    .records()
                    .into_iter()
                    .filter(|r| r.id().map_or(false, |id| ids.contains(&id)))
                    .collect();
                let values = std::iter::once((field, link.value()?)).collect();
                self.update_targets(values, targets)
            }
            RelationKind::ManyToMany => {
                let db = self.db();
                let statement = db.builder().insert_nm(link.property(), link.require_id()?, ids)?;
                db.execute(&statement)?;
                Ok(())
            }
            RelationKind::ManyToOne => Ok(()),
        }
    }
}
