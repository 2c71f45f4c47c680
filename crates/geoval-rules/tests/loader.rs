use std::fs;
use std::path::Path;

use geoval_model::{FieldType, GeometryType};
use geoval_rules::{
    AttributeCheck, ConfigError, GeometryCheck, RelationKind, load_rule_set, names,
};

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write rule table");
}

#[test]
fn loads_full_rules_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(
        dir.path(),
        "table.csv",
        "\u{feff}TABLE_ID,Table_Name,Geometry_Type,Required\nbuilding,Buildings,polygon,Y\nroad,,line,N\n",
    );
    write(
        dir.path(),
        "schema.csv",
        "table_id,column,type,length,nullable,primary_key,foreign_key\n\
         building,BLD_ID,text,10,N,Y,\n\
         building,PNU,text,19,Y,N,parcel.PNU\n",
    );
    write(
        dir.path(),
        "geometry.csv",
        "table_id,small_polygon,sliver,spike\nbuilding,Y,N,O\n",
    );
    write(
        dir.path(),
        "attribute.csv",
        "table_id,field,check_type,parameters\n\
         building,USE_CODE,codelist,01;02;03\n\
         building,FLOORS,range,1..200\n\
         building,BLD_ID,pattern,^B[0-9]+$\n",
    );
    write(
        dir.path(),
        "relation.csv",
        "case_type,main_table,related_table,field_filter,tolerance\n\
         PointInsidePolygon,poi,building,USE_CODE=01;02,\n\
         LineConnectivity,road,road,,2.5\n",
    );
    write(
        dir.path(),
        "criteria.csv",
        "name,value,unit\n최소폴리곤면적,1.0,m2\n스파이크각도,10,deg\n",
    );

    let rules = load_rule_set(dir.path()).expect("load rules");

    assert_eq!(rules.tables.len(), 2);
    assert_eq!(rules.tables[0].geometry_type, Some(GeometryType::Polygon));
    assert!(!rules.tables[1].required);

    assert_eq!(rules.schemas[0].field_type, Some(FieldType::Text));
    assert_eq!(rules.schemas[0].nullable, Some(false));
    assert!(rules.schemas[0].primary_key);
    let fk = rules.schemas[1].foreign_key.as_ref().expect("foreign key");
    assert_eq!((fk.table.as_str(), fk.column.as_str()), ("parcel", "PNU"));

    let geometry = &rules.geometries[0];
    assert!(geometry.is_enabled(GeometryCheck::SmallPolygon));
    assert!(geometry.is_enabled(GeometryCheck::Spike));
    assert!(!geometry.is_enabled(GeometryCheck::Sliver));

    assert!(matches!(
        rules.attributes[1].check,
        AttributeCheck::Range {
            min: Some(_),
            max: Some(_)
        }
    ));

    assert_eq!(rules.relations[0].kind, RelationKind::PointInsidePolygon);
    assert!(rules.relations[0].field_filter.is_some());
    assert_eq!(rules.relations[0].effective_tolerance(), 0.0);
    assert_eq!(rules.relations[1].effective_tolerance(), 2.5);

    assert_eq!(
        rules.criteria.get(names::MIN_POLYGON_AREA).map(|c| c.value),
        Some(1.0)
    );
    rules.check_criteria(|_| true).expect("criteria resolve");
}

#[test]
fn missing_tables_mean_no_rules() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "table.csv", "table_id\nbuilding\n");
    let rules = load_rule_set(dir.path()).expect("load rules");
    assert_eq!(rules.tables.len(), 1);
    assert!(rules.schemas.is_empty());
    assert!(rules.relations.is_empty());
    assert!(rules.criteria.is_empty());
}

#[test]
fn non_numeric_criterion_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "criteria.csv", "name,value\n최소선길이,short\n");
    let error = load_rule_set(dir.path()).expect_err("non-numeric criterion");
    assert!(matches!(error, ConfigError::NonNumericCriterion { .. }));
}

#[test]
fn invalid_regex_is_rejected_at_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(
        dir.path(),
        "attribute.csv",
        "table_id,field,check_type,parameters\nbuilding,BLD_ID,pattern,([unclosed\n",
    );
    let error = load_rule_set(dir.path()).expect_err("bad pattern");
    assert!(matches!(error, ConfigError::InvalidPattern { .. }));
}

#[test]
fn bad_flag_reports_line_and_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "table.csv", "table_id,required\nbuilding,Y\nroad,sometimes\n");
    match load_rule_set(dir.path()) {
        Err(ConfigError::InvalidValue { line, column, .. }) => {
            assert_eq!(line, 3);
            assert_eq!(column, "required");
        }
        other => panic!("expected invalid value, got {other:?}"),
    }
}

#[test]
fn missing_required_column_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "relation.csv", "case_type,main_table\nLineConnectivity,road\n");
    let error = load_rule_set(dir.path()).expect_err("missing column");
    assert!(matches!(error, ConfigError::MissingColumn { ref column, .. } if column == "related_table"));
}
