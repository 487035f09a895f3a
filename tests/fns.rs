//! End-to-end FNS scenarios: catalogue load, XSD validation,
//! Schematron assertion evaluation and error-template rendering.

mod common;

use common::{FNS_CATALOGUE, FNS_XSD, TestWorkspace};
use report_checker::error::CheckStatus;
use report_checker::fns::{FnsChecker, FnsCompendium};
use report_checker::input::CheckedFile;

const FILENAME: &str = "NO_NDS_9_2367_2367_2317083000231.xml";

fn workspace_with_compendium() -> (TestWorkspace, FnsCompendium) {
    let workspace = TestWorkspace::new();
    workspace.write("formats.xml", FNS_CATALOGUE);
    workspace.write("NO_NDS.xsd", FNS_XSD);
    let compendium = FnsCompendium::load(workspace.path()).expect("compendium loads");
    (workspace, compendium)
}

fn document(file_id: &str) -> String {
    format!(
        r#"<Файл ИдФайл="{file_id}" ВерсФорм="5.06">
  <Документ КНД="1151111">
    <СвНП/>
  </Документ>
</Файл>"#
    )
}

fn check(compendium: &FnsCompendium, filename: &str, xml: &str) -> CheckedFile {
    let mut file =
        CheckedFile::from_bytes(filename, xml.as_bytes().to_vec()).expect("document parses");
    FnsChecker::new(compendium).check_file(&mut file);
    file
}

#[test]
fn catalogue_skips_foreign_directions() {
    let (_workspace, compendium) = workspace_with_compendium();
    assert!(compendium.descriptor("1151111", "5.06").is_some());
    assert!(compendium.descriptor("999999", "1.0").is_none());
    let entry = compendium.format("1151111").unwrap();
    assert_eq!(entry.alias_short, "НДС");
}

#[test]
fn happy_path_passes_with_no_asserts() {
    let (_workspace, compendium) = workspace_with_compendium();
    let file = check(
        &compendium,
        FILENAME,
        &document("NO_NDS_9_2367_2367_2317083000231"),
    );
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::Passed);
    assert!(result.asserts.is_empty());
}

#[test]
fn failing_schematron_renders_the_error_template() {
    let (_workspace, compendium) = workspace_with_compendium();
    let file = check(&compendium, FILENAME, &document("WRONG"));
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::FailedSch);
    assert_eq!(result.asserts.len(), 1);
    let entry = &result.asserts[0];
    assert_eq!(entry.error_code, "0400400007");
    assert!(entry.description.contains("Имя файла"));
    assert!(entry.description.contains("не совпадает"));
    assert!(entry.description.contains("WRONG"));
    assert!(
        entry
            .description
            .contains("NO_NDS_9_2367_2367_2317083000231")
    );
}

#[test]
fn missing_required_element_fails_xsd_with_a_line() {
    let (_workspace, compendium) = workspace_with_compendium();
    let xml = r#"<Файл ИдФайл="NO_NDS_9_2367_2367_2317083000231" ВерсФорм="5.06">
  <Документ КНД="1151111"/>
</Файл>"#;
    let file = check(&compendium, FILENAME, xml);
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::FailedXsd);
    assert!(!result.asserts.is_empty());
    let entry = &result.asserts[0];
    assert!(entry.description.contains("СвНП"));
    assert!(entry.description.contains("строка 2"));
    assert_eq!(entry.error_code, "2");
}

#[test]
fn unknown_schema_key_reports_scheme_not_found() {
    let (_workspace, compendium) = workspace_with_compendium();
    let xml = r#"<Файл ИдФайл="x" ВерсФорм="9.99"><Документ КНД="1151111"><СвНП/></Документ></Файл>"#;
    let file = check(&compendium, "x.xml", xml);
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::Failed);
    assert!(
        result
            .description
            .unwrap()
            .contains("Не найдена проверочная схема")
    );
}

#[test]
fn missing_document_metadata_reports_file_attribute_error() {
    let (_workspace, compendium) = workspace_with_compendium();
    let xml = "<Файл><Другое/></Файл>";
    let file = check(&compendium, "x.xml", xml);
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::Failed);
    assert!(result.description.unwrap().contains("Не найдена информация о КНД"));
}

#[test]
fn file_id_mismatch_without_schematron_is_failed_ver() {
    // A schema version without assertions isolates the mandatory
    // file-id check.
    let plain_xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Документ" type="ТДокумент"/>
      </xs:sequence>
      <xs:attribute name="ИдФайл" use="required"/>
      <xs:attribute name="ВерсФорм" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="ТДокумент">
    <xs:sequence>
      <xs:element name="СвНП"/>
    </xs:sequence>
    <xs:attribute name="КНД" use="required"/>
  </xs:complexType>
</xs:schema>"#;
    let catalogue = r#"<formats>
  <format direction="ФНС" knd="1151111">
    <version number="5.07" xsd="NO_NDS_plain.xsd"/>
  </format>
</formats>"#;
    let workspace = TestWorkspace::new();
    workspace.write("formats.xml", catalogue);
    workspace.write("NO_NDS_plain.xsd", plain_xsd);
    let compendium = FnsCompendium::load(workspace.path()).unwrap();

    let xml = r#"<Файл ИдФайл="WRONG" ВерсФорм="5.07"><Документ КНД="1151111"><СвНП/></Документ></Файл>"#;
    let file = check(&compendium, FILENAME, xml);
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::FailedVer);
    assert!(result.description.unwrap().contains("не совпадает"));
}

#[test]
fn mandatory_rule_with_missing_context_is_a_context_error() {
    let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:annotation>
      <xs:appinfo>
        <pattern name="Обязательная проверка">
          <rule context="Подписант">
            <assert test="@ПрПодп = 1">
              <error code="9">нет подписанта</error>
            </assert>
          </rule>
        </pattern>
      </xs:appinfo>
    </xs:annotation>
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Документ" type="ТДокумент"/>
      </xs:sequence>
      <xs:attribute name="ИдФайл" use="required"/>
      <xs:attribute name="ВерсФорм" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="ТДокумент">
    <xs:sequence>
      <xs:element name="СвНП"/>
    </xs:sequence>
    <xs:attribute name="КНД" use="required"/>
  </xs:complexType>
</xs:schema>"#;
    let catalogue = r#"<formats>
  <format direction="" knd="1151111">
    <version number="5.06" xsd="NO_NDS.xsd"/>
  </format>
</formats>"#;
    let workspace = TestWorkspace::new();
    workspace.write("formats.xml", catalogue);
    workspace.write("NO_NDS.xsd", xsd);
    let compendium = FnsCompendium::load(workspace.path()).unwrap();

    // No Подписант element anywhere and the rule is not under a
    // choice: the whole check degrades to failed_sch.
    let file = check(
        &compendium,
        FILENAME,
        &document("NO_NDS_9_2367_2367_2317083000231"),
    );
    let result = file.verify_result.unwrap();
    assert_eq!(result.result, CheckStatus::FailedSch);
    assert!(result.description.unwrap().contains("Контекст"));
}

#[test]
fn evaluation_is_repeatable_across_runs() {
    let (_workspace, compendium) = workspace_with_compendium();
    let first = check(&compendium, FILENAME, &document("WRONG"));
    let second = check(&compendium, FILENAME, &document("WRONG"));
    let first = first.verify_result.unwrap();
    let second = second.verify_result.unwrap();
    assert_eq!(first.result, second.result);
    assert_eq!(first.asserts, second.asserts);
}
