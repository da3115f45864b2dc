use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Expr, ExprTrait, Order, Query};

use crate::db::*;
use crate::store::{RefugeStore, col_name, query_all, read_id};
use refuge_core::{
    CellKey, DatasetSnapshot, Id, OptionDescriptor, RefugeResult, SnapshotApi, assemble_snapshot,
};

impl RefugeStore {
    /// Selected options of every live record in the dataset, in option order.
    async fn option_values_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
    ) -> RefugeResult<HashMap<CellKey, Vec<OptionDescriptor>>> {
        let select = Query::select()
            .from(RefugeRecordOptionValues::Table)
            .column((RefugeRecordOptionValues::Table, RefugeRecordOptionValues::RecordId))
            .column((RefugeRecordOptionValues::Table, RefugeRecordOptionValues::FieldId))
            .column((RefugeFieldOptions::Table, RefugeFieldOptions::Id))
            .column((RefugeFieldOptions::Table, RefugeFieldOptions::Value))
            .column((RefugeFieldOptions::Table, RefugeFieldOptions::Label))
            .column((RefugeFieldOptions::Table, RefugeFieldOptions::Color))
            .column((RefugeFieldOptions::Table, RefugeFieldOptions::Position))
            .inner_join(
                RefugeFieldOptions::Table,
                Expr::col((RefugeRecordOptionValues::Table, RefugeRecordOptionValues::OptionId))
                    .equals((RefugeFieldOptions::Table, RefugeFieldOptions::Id)),
            )
            .and_where(
                Expr::col((RefugeRecordOptionValues::Table, RefugeRecordOptionValues::RecordId))
                    .in_subquery(self.live_record_ids(dataset_id)),
            )
            .order_by((RefugeFieldOptions::Table, RefugeFieldOptions::Position), Order::Asc)
            .order_by((RefugeFieldOptions::Table, RefugeFieldOptions::CreatedAt), Order::Asc)
            .to_owned();
        let mut values: HashMap<CellKey, Vec<OptionDescriptor>> = HashMap::new();
        for row in query_all(conn, &select).await? {
            let key = CellKey::new(
                read_id(&row, RefugeRecordOptionValues::RecordId)?,
                read_id(&row, RefugeRecordOptionValues::FieldId)?,
            );
            let option = OptionDescriptor {
                id: read_id(&row, RefugeFieldOptions::Id)?,
                value: row.try_get("", &col_name(RefugeFieldOptions::Value))?,
                label: row.try_get("", &col_name(RefugeFieldOptions::Label))?,
                color: row.try_get("", &col_name(RefugeFieldOptions::Color))?,
                position: row.try_get("", &col_name(RefugeFieldOptions::Position))?,
            };
            values.entry(key).or_default().push(option);
        }
        Ok(values)
    }
}

#[async_trait]
impl SnapshotApi for RefugeStore {
    async fn dataset_snapshot(&self, dataset_id: Id) -> RefugeResult<DatasetSnapshot> {
        let tx = self.begin_read().await?;
        let dataset = self.require_live_dataset(&tx, dataset_id).await?;
        let fields = self.listed_fields(&tx, dataset_id).await?;
        let records = self.live_records(&tx, dataset_id).await?;
        let record_ids: Vec<Id> = records.iter().map(|record| record.id).collect();
        let option_values = self.option_values_for(&tx, dataset_id).await?;
        let links = self.links_for(&tx, &record_ids).await?;
        tx.commit().await?;
        log::debug!(
            "snapshot dataset={dataset_id} fields={} records={}",
            fields.len(),
            records.len()
        );
        Ok(assemble_snapshot(
            dataset,
            fields,
            records,
            &option_values,
            &links,
        ))
    }
}
