#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns
    /// the path. Parent directories are created as needed.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent directories");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// An FNS fixture XSD for КНД 1151111 version 5.06 with one Schematron
/// rule comparing the filename to the root's file-id attribute.
pub const FNS_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Файл">
    <xs:annotation>
      <xs:appinfo>
        <pattern name="Проверка имени файла">
          <rule context="Файл">
            <assert test="usch:getFileName() = @ИдФайл">
              <error code="0400400007">Имя файла
                <select select="usch:getFileName()"/> не совпадает со значением элемента ИдФайл
                <select select="@ИдФайл"/>
              </error>
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
      <xs:element name="СвНП" minOccurs="1"/>
    </xs:sequence>
    <xs:attribute name="КНД" use="required"/>
  </xs:complexType>
</xs:schema>"#;

pub const FNS_CATALOGUE: &str = r#"<formats>
  <format direction="ФНС" obsolete="false" knd="1151111"
          alias-short="НДС" alias-full="Декларация по НДС">
    <version number="5.06" xsd="NO_NDS.xsd" date-from="01.01.2019" date-till="31.12.2030"/>
  </format>
  <format direction="ПФР" knd="999999">
    <version number="1.0" xsd="ignored.xsd"/>
  </format>
</formats>"#;

/// A STAT metaForm template for OKUD 0606010 with three controls:
/// column-sum equality, a ternary bound, and a guarded control over a
/// row that may be absent.
pub const STAT_TEMPLATE: &str = r#"<metaForm OKUD="0606010" idf="3" name="Сведения о производстве">
  <title>
    <item field="okpo" name="Код предприятия"/>
  </title>
  <sections>
    <section code="1" name="Раздел 1">
      <columns>
        <column code="0" type="B" name="Наименование"/>
        <column code="1" type="Z" name="Графа 1"/>
        <column code="2" type="Z" name="Графа 2"/>
        <column code="3" type="Z" name="Графа 3"/>
      </columns>
      <rows>
        <row code="01" type="D" name="Строка 1"/>
        <row code="02" type="D" name="Строка 2"/>
        <row code="03" type="D" name="Строка 3"/>
        <row code="04" type="D" name="Строка 4"/>
        <row code="05" type="D" name="Строка 5"/>
      </rows>
    </section>
  </sections>
  <controls>
    <control id="К-1" name="Равенство сумм граф 1 и 2"
             rule="SUM({[1][*][1]}) |=| SUM({[1][*][2]})"/>
    <control id="К-2" name="Графа 3 строки 01 в пределах"
             rule="0 |&lt;=| {[1][01][3]} |&lt;=| 100"/>
    <control id="К-3" name="Контроль отсутствующей строки"
             rule="{[1][77][1]} |&gt;| 0"/>
    <control id="К-4" name="Условный контроль"
             rule="{[1][01][1]} |&gt;| 0"
             condition="{[1][88][1]} |&gt;| 0"/>
  </controls>
</metaForm>"#;

/// Renders a STAT report document for the fixture template.
pub fn stat_report(rows: &[(&str, &[(&str, &str)])]) -> String {
    let mut body = String::from("<report>\n  <title>\n    <item name=\"okpo\" value=\"12345678\"/>\n  </title>\n  <sections>\n    <section code=\"1\">\n");
    for (code, cells) in rows {
        body.push_str(&format!("      <row code=\"{code}\">\n"));
        for (col, value) in *cells {
            body.push_str(&format!("        <col code=\"{col}\">{value}</col>\n"));
        }
        body.push_str("      </row>\n");
    }
    body.push_str("    </section>\n  </sections>\n</report>\n");
    body
}
