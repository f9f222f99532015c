//! Folding pipeline steps into SQL blocks
//!
//! Steps accumulate into one block while they arrive in clause order
//! (JOIN, WHERE, GROUP BY/PIVOT, SELECT, ORDER BY, LIMIT). A step that would
//! go back to an earlier clause closes the block, which then becomes the
//! `FROM (...) AS stage_<n>` source of the next one.

use stageq_ast::parse_compute;
use stageq_ir::{
    output_key_names, plan_join, AggOp, ComputeExpr, FieldPath, JoinKind, JoinOrigin, JoinStep, PipelineStep,
    PivotStep, SchemaProvider, SortDirection, Value,
};
use stageq_registry::FunctionRegistry;

use crate::sql::{compute_text, filter_text, quote_ident, quote_literal};
use crate::{FieldAccess, RenderError, RenderOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Clause {
    Join,
    Where,
    Group,
    Select,
    Order,
    Limit,
}

impl Clause {
    fn of(step: &PipelineStep) -> Self {
        match step {
            PipelineStep::Join(_) => Clause::Join,
            PipelineStep::Filter(_) => Clause::Where,
            PipelineStep::Group(_) | PipelineStep::Pivot(_) => Clause::Group,
            PipelineStep::Compute(_) | PipelineStep::Select(_) => Clause::Select,
            PipelineStep::Sort(_) => Clause::Order,
            PipelineStep::Limit(_) => Clause::Limit,
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Table(String),
    Stage { text: String, alias: String },
}

/// One SELECT under construction.
#[derive(Debug)]
struct Block {
    source: Source,
    /// Relations read directly as tables in this block
    tables: Vec<String>,
    joins: Vec<String>,
    filters: Vec<String>,
    group_by: Vec<String>,
    grouped: bool,
    select: Option<Vec<String>>,
    computed: Vec<(String, String)>,
    /// Names this block outputs that ORDER BY may reference directly
    outputs: Vec<FieldPath>,
    order: Vec<String>,
    limit: Option<(i64, i64)>,
    last: Option<Clause>,
}

impl Block {
    fn new(source: Source) -> Self {
        let tables = match &source {
            Source::Table(name) => vec![name.clone()],
            Source::Stage { .. } => Vec::new(),
        };
        Self {
            source,
            tables,
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            grouped: false,
            select: None,
            computed: Vec::new(),
            outputs: Vec::new(),
            order: Vec::new(),
            limit: None,
            last: None,
        }
    }

    /// Whether `step` can be folded into this block.
    fn admits(&self, step: &PipelineStep, formula: Option<&ComputeExpr>) -> bool {
        let clause = Clause::of(step);
        let Some(last) = self.last else {
            return true;
        };
        match step {
            PipelineStep::Join(_) | PipelineStep::Filter(_) => last <= clause,
            PipelineStep::Group(_) | PipelineStep::Pivot(_) | PipelineStep::Select(_) => last <= Clause::Where,
            PipelineStep::Compute(_) => {
                let reuses_alias = formula.map_or(false, |f| {
                    f.referenced_fields()
                        .iter()
                        .any(|p| self.computed.iter().any(|(alias, _)| p.to_string() == *alias))
                });
                last <= Clause::Select && !self.grouped && self.select.is_none() && !reuses_alias
            }
            PipelineStep::Sort(_) => last <= Clause::Order,
            PipelineStep::Limit(_) => last < Clause::Limit,
        }
    }

    fn stage_alias(&self) -> Option<&str> {
        match &self.source {
            Source::Stage { alias, .. } => Some(alias.as_str()),
            Source::Table(_) => None,
        }
    }
}

/// What the current rows carry, for checking inferred join keys.
#[derive(Debug, Clone)]
enum Shape {
    /// Qualified relation fields, as scanned and joined
    Raw,
    /// Reshaped by group, pivot or select
    Columns(Vec<FieldPath>),
}

enum Frame {
    Open(Block),
    /// A finished statement (pivot) that later steps must wrap
    Closed(String),
}

pub(crate) struct Planner<'a> {
    schemas: &'a dyn SchemaProvider,
    options: &'a RenderOptions,
    registry: &'a FunctionRegistry,
    base: String,
    current_relation: String,
    shape: Shape,
    stages: usize,
}

impl<'a> Planner<'a> {
    pub(crate) fn new(
        schemas: &'a dyn SchemaProvider,
        options: &'a RenderOptions,
        registry: &'a FunctionRegistry,
        base: &str,
    ) -> Self {
        Self {
            schemas,
            options,
            registry,
            base: base.to_string(),
            current_relation: base.to_string(),
            shape: Shape::Raw,
            stages: 0,
        }
    }

    pub(crate) fn plan(mut self, steps: &[PipelineStep]) -> Result<String, RenderError> {
        let mut frame = Frame::Open(Block::new(Source::Table(self.base.clone())));

        for (index, step) in steps.iter().enumerate() {
            let invalid = |reason: String| RenderError::InvalidStep {
                index,
                kind: step.kind(),
                reason,
            };

            let formula = match step {
                PipelineStep::Compute(c) => {
                    if c.alias.trim().is_empty() {
                        return Err(invalid("compute needs an alias".to_string()));
                    }
                    Some(parse_compute(&c.expression).map_err(|e| invalid(format!("invalid formula: {}", e)))?)
                }
                _ => None,
            };

            let block = match frame {
                Frame::Open(block) if block.admits(step, formula.as_ref()) => block,
                Frame::Open(block) => {
                    let text = self.finish(&block);
                    self.wrap(text)
                }
                Frame::Closed(text) => self.wrap(text),
            };

            frame = self.apply(block, step, formula.as_ref()).map_err(invalid)?;
        }

        Ok(match frame {
            Frame::Open(block) => self.finish(&block),
            Frame::Closed(text) => text,
        })
    }

    fn next_stage(&mut self) -> String {
        self.stages += 1;
        format!("stage_{}", self.stages)
    }

    fn wrap(&mut self, text: String) -> Block {
        let alias = self.next_stage();
        Block::new(Source::Stage { text, alias })
    }

    fn apply(&mut self, mut block: Block, step: &PipelineStep, formula: Option<&ComputeExpr>) -> Result<Frame, String> {
        match step {
            PipelineStep::Filter(f) => {
                if !f.condition.is_trivial() {
                    let text = filter_text(&f.condition, &|p: &FieldPath| self.field(&block, p))?;
                    block.filters.push(text);
                }
            }
            PipelineStep::Join(j) => self.join(&mut block, j),
            PipelineStep::Group(g) => {
                let aggregates = g
                    .aggregates
                    .iter()
                    .map(|spec| (spec.op, spec.field.clone(), spec.output_name()))
                    .collect();
                self.group(&mut block, &g.group_keys, aggregates);
            }
            PipelineStep::Pivot(p) if !p.col_keys.is_empty() => {
                let text = self.pivot(&block, p);
                self.shape = Shape::Columns(output_key_names(&p.row_keys));
                return Ok(Frame::Closed(text));
            }
            PipelineStep::Pivot(p) => {
                // no column keys: a plain group over the row keys
                let aggregates = p
                    .effective_values()
                    .into_iter()
                    .map(|value| {
                        let label = value.label();
                        (value.op, value.field, label)
                    })
                    .collect();
                self.group(&mut block, &p.row_keys, aggregates);
            }
            PipelineStep::Compute(c) => {
                let expr = formula.ok_or_else(|| "missing formula".to_string())?;
                let text = compute_text(expr, self.registry, &|p: &FieldPath| self.field(&block, p))?;
                block.computed.push((c.alias.clone(), text));
                block.outputs.push(FieldPath::single(c.alias.clone()));
                if let Shape::Columns(columns) = &mut self.shape {
                    columns.push(FieldPath::single(c.alias.clone()));
                }
            }
            PipelineStep::Select(s) => {
                if s.projections.is_empty() {
                    return Err("select needs at least one field".to_string());
                }
                let mut list = Vec::new();
                let mut outputs = Vec::new();
                let mut keeps_all = false;
                for projection in &s.projections {
                    if projection.from.is_wildcard() {
                        list.push("*".to_string());
                        keeps_all = true;
                        continue;
                    }
                    let output = projection.output_path();
                    list.push(format!(
                        "{} AS {}",
                        self.field(&block, &projection.from),
                        quote_ident(&output.to_string())
                    ));
                    outputs.push(output);
                }
                block.select = Some(list);
                block.outputs = outputs.clone();
                if !keeps_all {
                    self.shape = Shape::Columns(outputs);
                }
            }
            PipelineStep::Sort(s) => {
                let mut keys: Vec<String> = s
                    .orders
                    .iter()
                    .map(|k| {
                        let direction = match k.direction {
                            SortDirection::Asc => "ASC",
                            SortDirection::Desc => "DESC",
                        };
                        format!("{} {}", self.order_field(&block, &k.field), direction)
                    })
                    .collect();
                // a later sort takes precedence; stable sorting keeps the
                // earlier keys as tie-breakers
                keys.append(&mut block.order);
                block.order = keys;
            }
            PipelineStep::Limit(l) => {
                if l.offset < 0 {
                    return Err(format!("offset must not be negative, got {}", l.offset));
                }
                block.limit = Some((l.offset, l.count));
            }
        }
        block.last = Some(Clause::of(step));
        Ok(Frame::Open(block))
    }

    fn group(&mut self, block: &mut Block, keys: &[FieldPath], aggregates: Vec<(AggOp, FieldPath, String)>) {
        let names = output_key_names(keys);
        let mut list = Vec::new();
        for (key, name) in keys.iter().zip(&names) {
            let expr = self.field(block, key);
            list.push(format!("{} AS {}", expr, quote_ident(&name.to_string())));
            block.group_by.push(expr);
        }
        let mut outputs = names;
        for (op, field, name) in aggregates {
            list.push(format!("{} AS {}", self.aggregate(block, op, &field), quote_ident(&name)));
            outputs.push(FieldPath::single(name));
        }
        block.grouped = true;
        block.select = Some(list);
        block.outputs = outputs.clone();
        self.shape = Shape::Columns(outputs);
    }

    fn join(&mut self, block: &mut Block, step: &JoinStep) {
        let mut planned = plan_join(
            &self.current_relation,
            &step.right_relation,
            step.left_key.as_ref(),
            step.right_key.as_ref(),
            step.kind,
            self.schemas,
        );

        if planned.origin == JoinOrigin::Inferred {
            let usable = match (&self.shape, &planned.spec.left_key) {
                (Shape::Raw, _) => true,
                (Shape::Columns(columns), Some(key)) => covers(columns, key),
                (Shape::Columns(_), None) => false,
            };
            if !usable {
                planned.spec.left_key = None;
                planned.spec.right_key = None;
                planned.origin = JoinOrigin::CartesianFallback;
            }
        }

        let left_key = planned.spec.left_key.as_ref().map(|k| self.field(block, k));
        block.tables.push(step.right_relation.clone());
        let right_key = planned.spec.right_key.as_ref().map(|k| self.field(block, k));
        let table = self.table_ref(&step.right_relation);

        if planned.origin == JoinOrigin::CartesianFallback {
            block.joins.push(format!(
                "-- cartesian fallback: no join key between {} and {}",
                self.current_relation, step.right_relation
            ));
        }
        let line = match (left_key, right_key, planned.spec.kind) {
            (_, _, JoinKind::Cross) => format!("CROSS JOIN {}", table),
            (Some(l), Some(r), kind) => format!("{} JOIN {} ON {} = {}", kind.sql_keyword(), table, l, r),
            (_, _, JoinKind::Inner) => format!("CROSS JOIN {}", table),
            (_, _, kind) => format!("{} JOIN {} ON TRUE", kind.sql_keyword(), table),
        };
        block.joins.push(line);

        self.current_relation = step.right_relation.clone();
        self.shape = Shape::Raw;
    }

    fn pivot(&mut self, block: &Block, step: &PivotStep) -> String {
        let row_names = output_key_names(&step.row_keys);
        let col_names = output_key_names(&step.col_keys);

        let mut inner = Vec::new();
        for (key, name) in step.row_keys.iter().zip(&row_names).chain(step.col_keys.iter().zip(&col_names)) {
            inner.push(format!("{} AS {}", self.field(block, key), quote_ident(&name.to_string())));
        }
        let mut using = Vec::new();
        for value in step.effective_values() {
            let label = quote_ident(&value.label());
            if value.op == AggOp::Count {
                using.push(format!("COUNT(*) AS {}", label));
                continue;
            }
            let input = quote_ident(&value.field.underscored());
            let projected = format!("{} AS {}", self.field(block, &value.field), input);
            if !inner.contains(&projected) {
                inner.push(projected);
            }
            using.push(format!("{} AS {}", aggregate_call(value.op, &input), label));
        }

        let mut input = Block::new(block.source.clone());
        input.tables = block.tables.clone();
        input.joins = block.joins.clone();
        input.filters = block.filters.clone();
        input.select = Some(inner);

        let alias = self.next_stage();
        let mut lines = vec![
            "PIVOT (".to_string(),
            indent(&self.finish(&input)),
            format!(") AS {}", alias),
            format!(
                "ON {}",
                col_names.iter().map(|n| quote_ident(&n.to_string())).collect::<Vec<_>>().join(", ")
            ),
            format!("USING {}", using.join(", ")),
        ];
        if !row_names.is_empty() {
            lines.push(format!(
                "GROUP BY {}",
                row_names.iter().map(|n| quote_ident(&n.to_string())).collect::<Vec<_>>().join(", ")
            ));
        }
        lines.join("\n")
    }

    fn aggregate(&self, block: &Block, op: AggOp, field: &FieldPath) -> String {
        if op == AggOp::Count {
            return "COUNT(*)".to_string();
        }
        aggregate_call(op, &self.field(block, field))
    }

    fn table_ref(&self, relation: &str) -> String {
        match &self.options.source_table {
            Some(table) => format!("{} {}", table, quote_ident(relation)),
            None => quote_ident(relation),
        }
    }

    /// Relation a bare column name belongs to among the block's tables.
    fn owner(&self, block: &Block, column: &str) -> Option<String> {
        block
            .tables
            .iter()
            .rev()
            .find(|t| {
                self.schemas
                    .relation_schema(t)
                    .map_or(false, |schema| schema.has_column(column))
            })
            .cloned()
    }

    /// Access expression for a field in the block's scope.
    fn field(&self, block: &Block, path: &FieldPath) -> String {
        if let Some(q) = path.qualifier() {
            if block.tables.iter().any(|t| t == q) {
                return self.table_field(q, &path.unqualified());
            }
        }
        if let Some(stage) = block.stage_alias() {
            let unowned = path.segments().len() > 1 || self.owner(block, path.leaf()).is_none();
            if unowned {
                return format!("{}.{}", stage, quote_ident(&path.to_string()));
            }
        }
        if path.segments().len() == 1 {
            let relation = self
                .owner(block, path.leaf())
                .or_else(|| block.tables.last().cloned())
                .unwrap_or_else(|| self.current_relation.clone());
            return self.table_field(&relation, path.leaf());
        }
        let relation = block.tables.last().cloned().unwrap_or_else(|| self.current_relation.clone());
        self.table_field(&relation, &path.to_string())
    }

    /// ORDER BY may name columns this block outputs.
    fn order_field(&self, block: &Block, path: &FieldPath) -> String {
        let display = path.to_string();
        if block.outputs.iter().any(|o| o.to_string() == display) {
            return quote_ident(&display);
        }
        self.field(block, path)
    }

    fn table_field(&self, relation: &str, column: &str) -> String {
        let alias = quote_ident(relation);
        match self.options.field_access {
            FieldAccess::Json => format!(
                "JSON_VALUE({}.{}, {})",
                alias,
                quote_ident(&self.options.content_column),
                quote_literal(&Value::from(format!("$.{}", column)))
            ),
            FieldAccess::Column => format!("{}.{}", alias, quote_ident(column)),
        }
    }

    /// Latest-batch restriction for a staged relation.
    fn batch_filter(&self, table: &str, relation: &str) -> String {
        format!(
            "{alias}.{table}BatchId = (SELECT TOP 1 Id FROM {table}Batch WHERE DrawflowIdentifier = {name} ORDER BY CreatedAt DESC)",
            alias = quote_ident(relation),
            table = table,
            name = quote_literal(&Value::from(relation)),
        )
    }

    fn finish(&self, block: &Block) -> String {
        let mut select = match &block.select {
            Some(list) => list.clone(),
            None => vec!["*".to_string()],
        };
        for (alias, expr) in &block.computed {
            select.push(format!("{} AS {}", expr, quote_ident(alias)));
        }

        let mut lines = vec![format!("SELECT {}", select.join(", "))];
        match &block.source {
            Source::Table(name) => lines.push(format!("FROM {}", self.table_ref(name))),
            Source::Stage { text, alias } => {
                lines.push("FROM (".to_string());
                lines.push(indent(text));
                lines.push(format!(") AS {}", alias));
            }
        }
        lines.extend(block.joins.iter().cloned());

        let mut conditions = Vec::new();
        if let (Some(table), true) = (&self.options.source_table, self.options.batch_filter) {
            conditions.extend(block.tables.iter().map(|t| self.batch_filter(table, t)));
        }
        conditions.extend(block.filters.iter().cloned());
        if conditions.len() > 1 {
            for condition in conditions.iter_mut().filter(|c| needs_parens(c)) {
                *condition = format!("({})", condition);
            }
        }
        if !conditions.is_empty() {
            lines.push(format!("WHERE {}", conditions.join(" AND ")));
        }

        if !block.group_by.is_empty() {
            lines.push(format!("GROUP BY {}", block.group_by.join(", ")));
        }
        if !block.order.is_empty() {
            lines.push(format!("ORDER BY {}", block.order.join(", ")));
        }
        if let Some((offset, count)) = block.limit {
            if count > 0 {
                lines.push(format!("LIMIT {}", count));
            }
            if offset > 0 {
                lines.push(format!("OFFSET {}", offset));
            }
        }
        lines.join("\n")
    }
}

fn aggregate_call(op: AggOp, input: &str) -> String {
    format!("ROUND({}({}), 4)", op.name().to_ascii_uppercase(), input)
}

/// A top-level OR must not bind across the AND joining conditions.
fn needs_parens(condition: &str) -> bool {
    let mut depth = 0i32;
    let mut quoted = false;
    let bytes = condition.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'\'' => quoted = !quoted,
            b'(' if !quoted => depth += 1,
            b')' if !quoted => depth -= 1,
            b' ' if !quoted && depth == 0 => {
                if condition[i..].starts_with(" OR ") {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn covers(columns: &[FieldPath], key: &FieldPath) -> bool {
    let display = key.to_string();
    columns.iter().any(|c| c == key || c.to_string() == display)
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("  {}", l)).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageq_ir::{FilterExpr, FilterOp, FilterStep, LimitStep, SortKey, SortStep, StaticSchemaProvider};

    fn plan(steps: Vec<PipelineStep>) -> String {
        let schemas = StaticSchemaProvider::new()
            .with_columns("orders", &["id", "user_id", "amt"])
            .with_columns("users", &["id", "name"]);
        let options = RenderOptions::plain();
        let registry = FunctionRegistry::default();
        Planner::new(&schemas, &options, &registry, "orders").plan(&steps).unwrap()
    }

    fn filter(field: &str, op: FilterOp, value: i32) -> PipelineStep {
        PipelineStep::Filter(FilterStep {
            condition: FilterExpr::predicate(field, op, Value::from(value)),
        })
    }

    #[test]
    fn test_scan_only() {
        assert_eq!(plan(vec![]), "SELECT *\nFROM orders");
    }

    #[test]
    fn test_consecutive_filters_are_anded() {
        let text = plan(vec![filter("amt", FilterOp::Gt, 1), filter("orders.amt", FilterOp::Lt, 9)]);
        assert_eq!(text, "SELECT *\nFROM orders\nWHERE orders.amt > 1 AND orders.amt < 9");
    }

    #[test]
    fn test_filter_after_limit_wraps() {
        let text = plan(vec![
            PipelineStep::Limit(LimitStep { offset: 0, count: 5 }),
            filter("amt", FilterOp::Gt, 1),
        ]);
        assert_eq!(
            text,
            "SELECT *\nFROM (\n  SELECT *\n  FROM orders\n  LIMIT 5\n) AS stage_1\nWHERE stage_1.amt > 1"
        );
    }

    #[test]
    fn test_later_sort_keys_come_first() {
        let text = plan(vec![
            PipelineStep::Sort(SortStep {
                orders: vec![SortKey::asc("amt")],
            }),
            PipelineStep::Sort(SortStep {
                orders: vec![SortKey::desc("id")],
            }),
        ]);
        assert!(text.ends_with("ORDER BY orders.id DESC, orders.amt ASC"));
    }

    #[test]
    fn test_needs_parens() {
        assert!(needs_parens("a = 1 OR b = 2"));
        assert!(!needs_parens("(a = 1 OR b = 2)"));
        assert!(!needs_parens("a = ' OR '"));
    }
}
