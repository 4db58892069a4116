use crate::error::Result;
use tera::{Context, Tera};

/// Optional per-package hook invoked during the image build when present in
/// the package root.
pub const HOOK_SCRIPT: &str = "build.sh";

const MANIFEST_TEMPLATE: &str = r#"FROM {{ base_image }}
{%- if os_packages %}
RUN apt-get -y update && \
    apt-get -y --no-install-recommends install {{ os_packages }} && \
    rm -rf /var/lib/apt/lists/*
{%- endif %}
{%- if requirements %}
RUN pip3 install --no-cache-dir {{ requirements }}
{%- endif %}
COPY . /opt/lib
{%- if build_hook %}
RUN /opt/lib/build.sh
{%- endif %}
ENV JOBFORGE_RUNNER_IMPORTS="{{ imports }}"
"#;

/// Render the build manifest. Pure: same inputs, byte-identical output. The
/// one filesystem fact involved (hook presence) is passed in by the caller.
pub fn render(
    base_image: &str,
    os_packages: &[String],
    requirements: &[String],
    build_hook: bool,
    imports: &[String],
) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("manifest", MANIFEST_TEMPLATE)?;

    let mut context = Context::new();
    context.insert("base_image", base_image);
    context.insert("os_packages", &os_packages.join(" "));
    context.insert("requirements", &requirements.join(" "));
    context.insert("build_hook", &build_hook);
    context.insert("imports", &imports.join(","));

    Ok(tera.render("manifest", &context)?)
}
