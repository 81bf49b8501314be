//! YAML configuration: selection menus, histogram collections and ntuple
//! locations.
//!
//! All files are read with `serde_yaml_ng`. Anchors, aliases and `<<` merge
//! keys are resolved before deserialization, so menus can share cut lists.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use sidm_core::{Error, Result};
use sidm_ntuple::SchemaConfig;

/// Selection menu shipped with the crate.
pub const DEFAULT_SELECTIONS: &str = include_str!("../configs/selections.yaml");

/// Histogram collections shipped with the crate.
pub const DEFAULT_HIST_COLLECTIONS: &str = include_str!("../configs/hist_collections.yaml");

/// Ntuple versions [`NtupleLocations::make_fileset`] accepts.
pub const SUPPORTED_NTUPLE_VERSIONS: [&str; 2] = ["ffntuple_v2", "ffntuple_v4"];

/// Parse YAML text, resolving merge keys.
pub fn from_yaml_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    let mut value: Value = serde_yaml_ng::from_str(text)?;
    value.apply_merge()?;
    Ok(serde_yaml_ng::from_value(value)?)
}

/// Read and parse a YAML file.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    tracing::debug!(path = %path.display(), "loading YAML config");
    from_yaml_str(&text)
}

/// Schema naming conventions from a YAML file; missing keys keep their defaults.
pub fn load_schema_config(path: &Path) -> Result<SchemaConfig> {
    load_yaml(path)
}

/// Arbitrarily nested lists (and maps of lists) of names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameTree(pub Value);

impl NameTree {
    /// Tree from a flat list of names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self(Value::Sequence(names.iter().map(|s| Value::String(s.as_ref().to_string())).collect()))
    }

    /// Leaves in document order. Map keys are ignored, only values are visited.
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        visit(&self.0, &mut |name| out.push(name));
        out
    }

    /// Append the leaves not yet present in `names`.
    pub fn add_unique_and_flatten(&self, names: &mut Vec<String>) {
        visit(&self.0, &mut |name| {
            if !names.contains(&name) {
                names.push(name);
            }
        });
    }
}

fn visit(value: &Value, f: &mut impl FnMut(String)) {
    match value {
        Value::Null => {}
        Value::Bool(b) => f(b.to_string()),
        Value::Number(n) => f(n.to_string()),
        Value::String(s) => f(s.clone()),
        Value::Sequence(items) => items.iter().for_each(|v| visit(v, f)),
        Value::Mapping(map) => map.values().for_each(|v| visit(v, f)),
        Value::Tagged(tagged) => visit(&tagged.value, f),
    }
}

/// Cuts of one channel as written in the selection menu.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMenu {
    /// Object cuts per collection.
    #[serde(default)]
    pub obj_cuts: BTreeMap<String, NameTree>,
    /// Event cuts, applied in order.
    #[serde(default)]
    pub evt_cuts: Option<NameTree>,
    /// Cuts on the reconstructed lepton jets.
    #[serde(default)]
    pub lj_cuts: Option<NameTree>,
}

/// Selection menu: channel name -> cuts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionMenu(pub BTreeMap<String, ChannelMenu>);

impl SelectionMenu {
    /// Menu shipped with the crate.
    pub fn builtin() -> Result<Self> {
        from_yaml_str(DEFAULT_SELECTIONS)
    }

    /// Channel names.
    pub fn channels(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// Menu entry of `channel`.
    pub fn channel(&self, channel: &str) -> Result<&ChannelMenu> {
        self.0.get(channel).ok_or_else(|| {
            Error::Validation(format!("channel '{channel}' is not defined in the selection menu"))
        })
    }
}

/// Flattened cut lists of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelCuts {
    /// Object cuts per collection.
    pub obj: BTreeMap<String, Vec<String>>,
    /// Event cuts in order.
    pub evt: Vec<String>,
    /// Lepton-jet cuts, keyed by `ljs`.
    pub lj: BTreeMap<String, Vec<String>>,
}

/// Union of all object cuts (each evaluated once) and per-channel cut lists.
pub fn build_cuts(
    menu: &SelectionMenu,
    channels: &[String],
) -> Result<(BTreeMap<String, Vec<String>>, BTreeMap<String, ChannelCuts>)> {
    let mut all_obj_cuts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut channel_cuts = BTreeMap::new();

    for channel in channels {
        let cuts = menu.channel(channel)?;
        let mut out = ChannelCuts::default();
        for (obj, tree) in &cuts.obj_cuts {
            if obj == "ljs" {
                tracing::warn!(channel = %channel, "cuts on lepton jets belong under lj_cuts, not obj_cuts; skipping");
                continue;
            }
            tree.add_unique_and_flatten(all_obj_cuts.entry(obj.clone()).or_default());
            out.obj.insert(obj.clone(), tree.flatten());
        }
        if let Some(evt) = &cuts.evt_cuts {
            out.evt = evt.flatten();
        }
        let lj = match &cuts.lj_cuts {
            Some(lj) => lj.flatten(),
            None => {
                tracing::info!(channel = %channel, "not applying any cuts to the lepton jets");
                Vec::new()
            }
        };
        out.lj.insert("ljs".to_string(), lj);
        channel_cuts.insert(channel.clone(), out);
    }
    Ok((all_obj_cuts, channel_cuts))
}

/// Histogram collections: collection name -> nested histogram names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistMenu(pub BTreeMap<String, NameTree>);

impl HistMenu {
    /// Collections shipped with the crate.
    pub fn builtin() -> Result<Self> {
        from_yaml_str(DEFAULT_HIST_COLLECTIONS)
    }

    /// Histogram names of the given collections, in order, without duplicates.
    pub fn hist_names(&self, collections: &[String]) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for collection in collections {
            let tree = self.0.get(collection).ok_or_else(|| {
                Error::Validation(format!("histogram collection '{collection}' is not defined"))
            })?;
            tree.add_unique_and_flatten(&mut names);
        }
        Ok(names)
    }
}

/// Location of one sample's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleLocation {
    /// Path relative to the version's base path.
    pub path: String,
    /// File names relative to `path`.
    pub files: Vec<String>,
}

/// Files of one ntuple version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionLocation {
    /// Base path (prefix) of every sample.
    pub path: String,
    /// Samples by name.
    pub samples: BTreeMap<String, SampleLocation>,
}

/// Ntuple locations: version -> samples -> files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NtupleLocations(pub BTreeMap<String, VersionLocation>);

impl NtupleLocations {
    /// Full file paths per sample. Negative `max_files` keeps every file.
    pub fn make_fileset(
        &self,
        samples: &[String],
        ntuple_version: &str,
        max_files: i64,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        if !SUPPORTED_NTUPLE_VERSIONS.contains(&ntuple_version) {
            return Err(Error::NotImplemented(format!(
                "ntuple version '{ntuple_version}'; only {} are supported",
                SUPPORTED_NTUPLE_VERSIONS.join(" and ")
            )));
        }
        let version = self.0.get(ntuple_version).ok_or_else(|| {
            Error::Validation(format!("no locations given for ntuple version '{ntuple_version}'"))
        })?;
        let mut fileset = BTreeMap::new();
        for sample in samples {
            let loc = version.samples.get(sample).ok_or_else(|| {
                Error::Validation(format!("sample '{sample}' not found for '{ntuple_version}'"))
            })?;
            let base = format!("{}{}", version.path, loc.path);
            let limit = usize::try_from(max_files).unwrap_or(usize::MAX);
            let files: Vec<String> = loc.files.iter().take(limit).map(|f| format!("{base}{f}")).collect();
            fileset.insert(sample.clone(), files);
        }
        Ok(fileset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flatten_nested_lists_and_maps() {
        let tree: NameTree = from_yaml_str("[a, [b, [c]], {x: [d, a], y: e}]").unwrap();
        assert_eq!(tree.flatten(), names(&["a", "b", "c", "d", "a", "e"]));
        let mut acc = names(&["c"]);
        tree.add_unique_and_flatten(&mut acc);
        assert_eq!(acc, names(&["c", "a", "b", "d", "e"]));
    }

    #[test]
    fn build_cuts_merges_object_cuts_across_channels() {
        let menu: SelectionMenu = from_yaml_str(
            r#"
a:
  obj_cuts:
    muons: [[pT > 10 GeV], "|eta| < 2.4"]
    ljs: [pT > 30 GeV]
  evt_cuts: [PV filter, [">=2 LJs"]]
  lj_cuts: [pT > 30 GeV]
b:
  obj_cuts:
    muons: [pT > 10 GeV, dxy]
"#,
        )
        .unwrap();
        let (all, per_channel) = build_cuts(&menu, &names(&["a", "b"])).unwrap();
        assert_eq!(all["muons"], names(&["pT > 10 GeV", "|eta| < 2.4", "dxy"]));
        assert!(!all.contains_key("ljs"));
        assert_eq!(per_channel["a"].evt, names(&["PV filter", ">=2 LJs"]));
        assert_eq!(per_channel["a"].lj["ljs"], names(&["pT > 30 GeV"]));
        assert!(per_channel["b"].lj["ljs"].is_empty());
        assert!(build_cuts(&menu, &names(&["nope"])).is_err());
    }

    #[test]
    fn builtin_menus_parse() {
        let menu = SelectionMenu::builtin().unwrap();
        let four_mu = menu.channel("4mu").unwrap();
        assert_eq!(four_mu.evt_cuts.as_ref().unwrap().flatten().last().unwrap(), "4mu");
        // merged from the base channel
        assert_eq!(four_mu.obj_cuts["pvs"].flatten().len(), 3);

        let hists = HistMenu::builtin().unwrap();
        let base = hists.hist_names(&names(&["base"])).unwrap();
        assert!(base.contains(&"lj_pt".to_string()));
        let defs = crate::histograms::hist_defs();
        for name in hists.hist_names(&hists.0.keys().cloned().collect::<Vec<_>>()).unwrap() {
            assert!(defs.contains_key(&name), "{name} has no definition");
        }
    }

    #[test]
    fn fileset() {
        let locs: NtupleLocations = from_yaml_str(
            r#"
ffntuple_v4:
  path: root://host//store/
  samples:
    sig:
      path: sig/
      files: [a.parquet, b.parquet, c.parquet]
"#,
        )
        .unwrap();
        let fs = locs.make_fileset(&names(&["sig"]), "ffntuple_v4", 2).unwrap();
        assert_eq!(fs["sig"], names(&["root://host//store/sig/a.parquet", "root://host//store/sig/b.parquet"]));
        assert_eq!(locs.make_fileset(&names(&["sig"]), "ffntuple_v4", -1).unwrap()["sig"].len(), 3);
        assert!(matches!(locs.make_fileset(&[], "ffntuple_v1", -1), Err(Error::NotImplemented(_))));
        assert!(locs.make_fileset(&names(&["bkg"]), "ffntuple_v4", -1).is_err());
    }

    #[test]
    fn schema_config_override() {
        let cfg: SchemaConfig = from_yaml_str("multiword_objects: [akjet_ak4PFJetsCHS, my_obj]").unwrap();
        assert_eq!(cfg.multiword_objects.len(), 2);
        assert_eq!(cfg.lorentz_suffixes, SchemaConfig::default().lorentz_suffixes);
    }
}
