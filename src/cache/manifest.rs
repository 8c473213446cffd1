use url::Url;

/// Static shell of the app, pre-filled into every new generation.
pub const DEFAULT_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/style.css",
  "/app.js",
  "/manifest.json",
  "/icons/icon-192.png",
  "/icons/icon-512.png",
];

/// Ordered list of resources that must be stored before a generation can
/// serve offline traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  entries: Vec<Url>,
}

impl Manifest {
  /// Resolve manifest paths against the app origin.
  pub fn resolve<S: AsRef<str>>(origin: &Url, paths: &[S]) -> Result<Self, url::ParseError> {
    let entries = paths
      .iter()
      .map(|p| origin.join(p.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { entries })
  }

  pub fn entries(&self) -> &[Url] {
    &self.entries
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_keeps_order() {
    let origin = Url::parse("https://fuel.example").unwrap();
    let manifest = Manifest::resolve(&origin, &["/index.html", "/style.css", "/"]).unwrap();

    let urls: Vec<&str> = manifest.entries().iter().map(Url::as_str).collect();
    assert_eq!(
      urls,
      vec![
        "https://fuel.example/index.html",
        "https://fuel.example/style.css",
        "https://fuel.example/"
      ]
    );
  }
}
