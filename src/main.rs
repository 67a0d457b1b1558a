use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use relfilter::backend::database::DatabaseBackendConfig;
use relfilter::backend::{Backend, BackendFactory};
use relfilter::config::AppConfig;
use relfilter::error::{AppError, AppResult};
use relfilter::extractors::FilterQuery;
use relfilter::logging::init_logging;
use relfilter::mutation::{MutationRequest, RelationMutationResolver};
use relfilter::parser::decode_scalar;
use relfilter::query::{
    PredicateBuilder, QueryContext, QueryPlanApplier, SqlDialect, SqlQueryBuilder,
};
use relfilter::schema::{ConfigSchemaProvider, SchemaGuard};

#[derive(Parser, Debug)]
#[command(name = "relfilter")]
#[command(about = "Schema-driven filter compiler and relation mutation resolver")]
struct Args {
    /// Configuration file path (default: config.yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a query string into a predicate and parameterized SQL
    Compile {
        entity: String,
        /// Raw query string, e.g. 'filter[0][id][equal][0]=5&sort_by[name]=desc'
        query: String,
        /// SQL dialect to render (sqlite or postgres); defaults to the configured database
        #[arg(long)]
        dialect: Option<String>,
    },
    /// Create the tables described by the configured schema
    Init,
    /// Run a compiled filter against the configured database
    Query { entity: String, query: String },
    /// List the rows one entity reaches through a relation, filtered and sorted
    Related {
        entity: String,
        /// Primary key of the parent row
        key: String,
        relation: String,
        /// Raw query string applied to the related entity
        #[arg(default_value = "")]
        query: String,
    },
    /// Apply a relations payload to one entity and save it
    Mutate {
        entity: String,
        /// Primary key of the aggregate root
        key: String,
        /// JSON body: {"relations": {"<name>": {"add": ..., "remove": ...}}}
        payload: String,
    },
}

struct App {
    config: AppConfig,
    guard: Arc<SchemaGuard>,
    context: QueryContext,
}

impl App {
    fn load(config_path: &str) -> AppResult<Self> {
        let config = if config_path == "config.yaml" && !Path::new(config_path).exists() {
            eprintln!("No config.yaml found, using default configuration:");
            eprintln!("   - In-memory SQLite database");
            eprintln!("   - Single entity 'items' with fields id, name");
            AppConfig::default_config()
        } else {
            AppConfig::load_from_file(config_path)?
        };

        let guard = Arc::new(SchemaGuard::load(&ConfigSchemaProvider::new(
            config.entities.clone(),
        ))?);
        let context = QueryContext::from_config(&config.query, &guard.snapshot())?;

        Ok(Self {
            config,
            guard,
            context,
        })
    }

    async fn backend(&self) -> AppResult<Arc<dyn Backend>> {
        let backend_config = DatabaseBackendConfig::from_app_config(&self.config.database)?;
        let backend = BackendFactory::create(&backend_config, Arc::clone(&self.guard)).await?;
        // Nothing outlives the process, so start from empty tables
        if backend_config.is_memory_database() {
            backend.init_schema().await?;
        }
        Ok(backend)
    }

    fn compile(&self, entity: &str, query: &str, dialect: SqlDialect) -> AppResult<Value> {
        let snapshot = self.guard.snapshot();
        let schema = snapshot
            .entity(entity)
            .ok_or_else(|| AppError::NotFound(format!("Entity '{}' is not declared", entity)))?;

        let request = FilterQuery::from_query_string(query);
        let filter = request.expression(entity);
        let applier = QueryPlanApplier::new(Arc::clone(&snapshot), self.context.clone());

        let mut predicate = PredicateBuilder::new();
        applier.apply(&filter, &mut predicate);

        let mut sql = SqlQueryBuilder::new(dialect, &schema.descriptor);
        applier.apply(&filter, &mut sql);
        applier.apply_sort(entity, &request.sort_by, &mut sql);
        let compiled = sql.finish();

        Ok(json!({
            "filter": filter.serialize(),
            "predicate": predicate.build().map(|p| p.to_string()),
            "sql": compiled.select_json(&schema.sorted_field_names()),
            "params": compiled.params,
        }))
    }

    async fn query(&self, entity: &str, query: &str) -> AppResult<Value> {
        let backend = self.backend().await?;
        let snapshot = self.guard.snapshot();
        let schema = snapshot
            .entity(entity)
            .ok_or_else(|| AppError::NotFound(format!("Entity '{}' is not declared", entity)))?;

        let request = FilterQuery::from_query_string(query);
        let filter = request.expression(entity);
        let applier = QueryPlanApplier::new(Arc::clone(&snapshot), self.context.clone());

        let mut sql = SqlQueryBuilder::new(backend.dialect(), &schema.descriptor);
        applier.apply(&filter, &mut sql);
        applier.apply_sort(entity, &request.sort_by, &mut sql);

        let rows = backend.find_where(entity, &sql.finish()).await?;
        Ok(Value::Array(
            rows.into_iter().map(|e| Value::Object(e.attributes)).collect(),
        ))
    }

    async fn related(&self, entity: &str, key: &str, relation: &str, query: &str) -> AppResult<Value> {
        let backend = self.backend().await?;
        let snapshot = self.guard.snapshot();
        let applier = QueryPlanApplier::new(Arc::clone(&snapshot), self.context.clone());
        let related = applier.related_schema(entity, relation).ok_or_else(|| {
            AppError::NotFound(format!("Relation '{}' is not declared on '{}'", relation, entity))
        })?;

        let request = FilterQuery::from_query_string(query);
        let filter = request.expression(related.name());
        let mut sql = SqlQueryBuilder::new(backend.dialect(), &related.descriptor);
        if !applier.apply_on_relation(entity, &decode_scalar(key), relation, &filter, &mut sql) {
            return Err(AppError::BadRequest(format!(
                "Relation '{}' of '{}' cannot be listed",
                relation, entity
            )));
        }
        applier.apply_sort(related.name(), &request.sort_by, &mut sql);

        let rows = backend.find_where(related.name(), &sql.finish()).await?;
        Ok(Value::Array(
            rows.into_iter().map(|e| Value::Object(e.attributes)).collect(),
        ))
    }

    async fn mutate(&self, entity: &str, key: &str, payload: &str) -> AppResult<Value> {
        let backend = self.backend().await?;
        let descriptor = self
            .guard
            .entity(entity)
            .ok_or_else(|| AppError::NotFound(format!("Entity '{}' is not declared", entity)))?;

        let body: Value = serde_json::from_str(payload)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON payload: {}", e)))?;
        let relations = body.get("relations").unwrap_or(&body);
        let requests = MutationRequest::from_relations(relations);

        let mut root = backend
            .find_by_key(&descriptor, &decode_scalar(key))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} '{}' not found", entity, key)))?;

        let resolver =
            RelationMutationResolver::<dyn Backend>::new(Arc::clone(&self.guard), Arc::clone(&backend));
        let changed = resolver.resolve_all(&mut root, &requests).await?;
        let root = backend.save(&descriptor, &root).await?;

        Ok(json!({
            "changed": changed,
            "entity": Value::Object(root.attributes),
        }))
    }
}

async fn run(args: Args) -> AppResult<Value> {
    let app = App::load(&args.config)?;

    match args.command {
        Command::Compile {
            entity,
            query,
            dialect,
        } => {
            let dialect = match dialect {
                Some(name) => SqlDialect::from_db_type(&name)?,
                None => SqlDialect::from_db_type(&app.config.database.db_type)?,
            };
            app.compile(&entity, &query, dialect)
        }
        Command::Init => {
            let backend = app.backend().await?;
            backend.health_check().await?;
            backend.init_schema().await?;
            Ok(json!({ "initialized": app.guard.snapshot().len() }))
        }
        Command::Query { entity, query } => app.query(&entity, &query).await,
        Command::Related {
            entity,
            key,
            relation,
            query,
        } => app.related(&entity, &key, &relation, &query).await,
        Command::Mutate {
            entity,
            key,
            payload,
        } => app.mutate(&entity, &key, &payload).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let output = run(args).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
