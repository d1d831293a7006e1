//! The sample registry.
//!
//! Each sample receives a logged-in [`Session`] with `skipnulls` enabled and
//! prints what it finds to stdout.

use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use domain::{Entity, Parameters};
use serde_json::json;
use session::{DataModel, EntityKey, EntityQuery, Session, Value};

pub type SampleFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
pub type SampleFn = for<'a> fn(&'a Session) -> SampleFuture<'a>;

/// A named, runnable sample.
pub struct Sample {
    pub name: &'static str,
    pub summary: &'static str,
    pub run: SampleFn,
}

/// Every sample, in menu order.
pub const SAMPLES: &[Sample] = &[
    Sample {
        name: "load-products",
        summary: "List active products with their product group",
        run: load_products,
    },
    Sample {
        name: "filter-by-reference",
        summary: "List products of the first active product group",
        run: filter_by_reference,
    },
    Sample {
        name: "update-product",
        summary: "Change a product's measurement unit, ABC class and lot size",
        run: update_product,
    },
    Sample {
        name: "front-end-transaction",
        summary: "Edit a sales order in a front-end transaction and print the changes",
        run: front_end_transaction,
    },
    Sample {
        name: "change-document-state",
        summary: "Invoke the ChangeState action on a sales order",
        run: change_document_state,
    },
    Sample {
        name: "adjust-released-order",
        summary: "Edit a released sales order and create adjustment documents",
        run: adjust_released_order,
    },
    Sample {
        name: "batch-update",
        summary: "Update several products in one batch inside a transaction",
        run: batch_update,
    },
];

/// Looks a sample up by name (case-insensitive) or by 1-based menu number.
pub fn find(selector: &str) -> Option<&'static Sample> {
    let selector = selector.trim();
    if let Ok(number) = selector.parse::<usize>() {
        return number.checked_sub(1).and_then(|i| SAMPLES.get(i));
    }
    SAMPLES
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(selector))
}

const PRODUCTS: &str = "General_Products_Products";
const PRODUCT_GROUPS: &str = "General_Products_ProductGroups";
const MEASUREMENT_UNITS: &str = "General_MeasurementUnits";
const SALES_ORDERS: &str = "Crm_Sales_SalesOrders";
const CUSTOMERS: &str = "Crm_Customers";

const FIRM_PLANNED_ORDERS: &str =
    "DocumentDate ge 2012-01-01T00:00:00Z and State eq 'FirmPlanned'";
const RELEASED_ORDERS: &str = "DocumentDate ge 2012-01-01T00:00:00Z and State eq 'Released'";

fn print_products(products: &[Entity]) -> anyhow::Result<()> {
    for product in products {
        let group = product.resolve_path("ProductGroup.Code")?;
        let part_number = product.resolve_path("PartNumber")?;
        println!("{group}\t{part_number}");
    }
    Ok(())
}

/// `Set(id)` addressing `entity`, as used by `@odata.bind` and reference filters.
fn bind(set: &str, entity: &Entity) -> anyhow::Result<String> {
    Ok(EntityKey::from_entity(entity)?.path(set))
}

fn load_products(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let products = session
            .client()
            .find_entries(
                &EntityQuery::for_set(PRODUCTS)
                    .filter("Active eq true")
                    .top(10)
                    .expand(["ProductGroup"])
                    .select(["PartNumber", "ProductGroup/Code"]),
            )
            .await?;
        print_products(&products)
    })
}

fn filter_by_reference(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let group = session
            .client()
            .find_entry(
                &EntityQuery::for_set(PRODUCT_GROUPS)
                    .filter("Active eq true")
                    .top(1)
                    .select(["Id"]),
            )
            .await?
            .context("no active product group")?;

        let products = session
            .client()
            .find_entries(
                &EntityQuery::for_set(PRODUCTS)
                    .filter(format!(
                        "ProductGroup eq '{}'",
                        bind(PRODUCT_GROUPS, &group)?
                    ))
                    .top(10)
                    .expand(["ProductGroup"])
                    .select(["PartNumber", "ProductGroup/Code"]),
            )
            .await?;
        print_products(&products)
    })
}

fn update_product(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let client = session.client();
        let product = client
            .find_entry(&EntityQuery::for_set(PRODUCTS).filter("PartNumber eq '1000044591'"))
            .await?
            .context("product 1000044591 not found")?;
        let unit = client
            .find_entry(&EntityQuery::for_set(MEASUREMENT_UNITS).filter("Code eq 'бр'"))
            .await?
            .context("measurement unit 'бр' not found")?;

        client
            .update_entry(
                PRODUCTS,
                &EntityKey::from_entity(&product)?,
                json!({
                    "MeasurementUnit@odata.bind": bind(MEASUREMENT_UNITS, &unit)?,
                    "ABCClass": "A",
                    "StandardLotSizeBase": { "Value": 3.45, "Unit": "бр" }
                }),
            )
            .await?;
        println!("Updated product {}", product.resolve_path("PartNumber")?);
        Ok(())
    })
}

fn front_end_transaction(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let mut transaction = session.begin_front_end_transaction(true).await?;
        let client = transaction.client();

        let order = client
            .find_entry(&EntityQuery::for_set(SALES_ORDERS).filter(FIRM_PLANNED_ORDERS))
            .await?
            .context("no firm-planned sales order")?;
        let customer = client
            .find_entry(&EntityQuery::for_set(CUSTOMERS))
            .await?
            .context("no customer")?;
        client
            .update_entry(
                SALES_ORDERS,
                &EntityKey::from_entity(&order)?,
                json!({ "Customer@odata.bind": bind(CUSTOMERS, &customer)? }),
            )
            .await?;

        // Only changes since the previous call are returned.
        let changes = transaction.get_changes().await?;
        for (kind, payloads) in changes.iter() {
            for payload in payloads {
                println!("\n{kind}:\n{}", pretty(payload)?);
            }
        }

        // Never committed: this is a demonstration.
        transaction.rollback().await?;
        Ok(())
    })
}

fn change_document_state(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let order = session
            .client()
            .find_entry(
                &EntityQuery::for_set(SALES_ORDERS)
                    .filter(FIRM_PLANNED_ORDERS)
                    .select(["Id"])
                    .top(1),
            )
            .await?
            .context("no firm-planned sales order")?;

        let mut parameters = Parameters::new();
        parameters.insert("newState".to_owned(), json!("FirmPlanned"));
        let action = format!("{}/ChangeState", EntityKey::from_entity(&order)?.path(SALES_ORDERS));
        session.client().execute_action(&action, parameters).await?;
        println!("Changed state of {}", order.id()?);
        Ok(())
    })
}

fn adjust_released_order(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let mut transaction = session.begin_front_end_transaction(false).await?;
        let client = transaction.client();

        let order = client
            .find_entry(&EntityQuery::for_set(SALES_ORDERS).filter(RELEASED_ORDERS))
            .await?
            .context("no released sales order")?;
        client
            .update_entry(
                SALES_ORDERS,
                &EntityKey::from_entity(&order)?,
                json!({ "Note": "Adjusted by domainapi-samples" }),
            )
            .await?;

        let adjusted = transaction.create_adjustment_documents().await;
        transaction.rollback().await?;
        adjusted?;
        println!("Created adjustment documents for {}", order.id()?);
        Ok(())
    })
}

fn batch_update(session: &Session) -> SampleFuture<'_> {
    Box::pin(async move {
        let mut transaction = session.begin_transaction(DataModel::Common, false).await?;
        let products = transaction
            .client()
            .find_entries(
                &EntityQuery::for_set(PRODUCTS)
                    .filter("Active eq true")
                    .select(["Id"])
                    .top(3),
            )
            .await?;

        let mut batch = transaction.batch();
        for product in &products {
            batch.update(
                PRODUCTS,
                EntityKey::from_entity(product)?,
                json!({ "ABCClass": "A" }),
            );
        }
        let results = batch.execute().await;
        transaction.rollback().await?;
        println!("Batch of {} update(s) accepted", results?.len());
        Ok(())
    })
}

fn pretty(value: &Value) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&value.to_json())?)
}
