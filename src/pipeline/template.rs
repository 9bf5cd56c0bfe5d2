//! 模板填充：确定性的替代生成路径
//!
//! 请求结构化文案（hero、3 个服务、about、contact、3 条 FAQ、footer），校验必需子结构；
//! 失败时替换为由品牌上下文派生的完整静态文案（不抛错、不走校验）。随后确定性地输出固定的文件拓扑，
//! 品牌色与两个固定字体写入样式表。该路径天然不进入校验 / 修复级联。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::repairer::css_variables_block;
use crate::pipeline::stage::request_json;
use crate::pipeline::validator::{ENTRY_FILE, ROOT_FILE, STYLESHEET_FILE};
use crate::pipeline::{
    BrandContext, FileSet, GenerationQuality, QualityProfile, StageControl, StageSource,
};

pub const CONTENT_FILE: &str = "src/content.ts";
pub const TEMPLATE_FONTS: [&str; 2] = ["Inter", "Playfair Display"];

/// 模板固定输出的全部路径
pub const TEMPLATE_PATHS: [&str; 10] = [
    ENTRY_FILE,
    ROOT_FILE,
    "src/components/Hero.tsx",
    "src/components/Services.tsx",
    "src/components/About.tsx",
    "src/components/Contact.tsx",
    "src/components/Faq.tsx",
    "src/components/Footer.tsx",
    CONTENT_FILE,
    STYLESHEET_FILE,
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeroContent {
    pub title: String,
    pub subtitle: String,
    pub cta_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceItem {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AboutContent {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactContent {
    pub headline: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterContent {
    pub text: String,
}

/// 模板文案
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateContent {
    pub hero: HeroContent,
    pub services: Vec<ServiceItem>,
    pub about: AboutContent,
    pub contact: ContactContent,
    pub faq: Vec<FaqItem>,
    pub footer: FooterContent,
}

/// 模板变体：共用文件拓扑，只有根组件中的分区顺序不同
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVariant {
    Landing,
    Services,
}

impl TemplateVariant {
    /// 未知 ID 回退到 Landing
    pub fn from_id(id: Option<&str>) -> Self {
        match id.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("landing") => TemplateVariant::Landing,
            Some("services") => TemplateVariant::Services,
            Some(other) => {
                tracing::warn!(template_id = other, "Unknown template id, using landing");
                TemplateVariant::Landing
            }
        }
    }

    fn section_order(&self) -> [&'static str; 5] {
        match self {
            TemplateVariant::Landing => ["Hero", "Services", "About", "Faq", "Contact"],
            TemplateVariant::Services => ["Hero", "Services", "Faq", "About", "Contact"],
        }
    }
}

/// 模板填充输出
#[derive(Debug, Clone)]
pub struct TemplateOutcome {
    pub files: FileSet,
    pub content: TemplateContent,
    pub variant: TemplateVariant,
    pub source: StageSource,
}

pub struct TemplateFill {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl TemplateFill {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub async fn fill(
        &self,
        request: &str,
        brand: &BrandContext,
        quality: GenerationQuality,
        template_id: Option<&str>,
        control: &StageControl,
    ) -> Result<TemplateOutcome, PipelineError> {
        let variant = TemplateVariant::from_id(template_id);
        let profile = QualityProfile::for_quality(quality);
        let prompt = build_content_prompt(request, brand);
        let options = profile.plan_options(&self.model, 0.7);

        let (content, source) =
            match request_json::<TemplateContent>(self.llm.as_ref(), &prompt, &options, control).await {
                Ok((content, stage)) => match check_content(&content) {
                    Ok(()) => (fill_blanks(content, &static_content(brand)), StageSource::Model(stage)),
                    Err(reason) => {
                        tracing::warn!(reason = %reason, "Template content incomplete, using static content");
                        (static_content(brand), StageSource::Fallback { reason })
                    }
                },
                Err(failure) => {
                    let reason = failure.into_reason()?;
                    tracing::warn!(reason = %reason, "Template content request failed, using static content");
                    (static_content(brand), StageSource::Fallback { reason })
                }
            };

        Ok(TemplateOutcome {
            files: render_files(brand, &content, variant),
            content,
            variant,
            source,
        })
    }
}

/// 必需子结构：hero.title 非空、至少一个服务、至少一条 FAQ
fn check_content(content: &TemplateContent) -> Result<(), String> {
    if content.hero.title.trim().is_empty() {
        return Err("hero.title is empty".to_string());
    }
    if content.services.is_empty() {
        return Err("no services".to_string());
    }
    if content.faq.is_empty() {
        return Err("no faq entries".to_string());
    }
    Ok(())
}

fn or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// 模型文案中的空字段用静态文案补齐，保证所有字段非空
fn fill_blanks(content: TemplateContent, fallback: &TemplateContent) -> TemplateContent {
    let services = content
        .services
        .into_iter()
        .zip(fallback.services.iter().cycle())
        .map(|(s, d)| ServiceItem {
            title: or_default(s.title, &d.title),
            description: or_default(s.description, &d.description),
        })
        .collect();
    let faq = content
        .faq
        .into_iter()
        .zip(fallback.faq.iter().cycle())
        .map(|(f, d)| FaqItem {
            question: or_default(f.question, &d.question),
            answer: or_default(f.answer, &d.answer),
        })
        .collect();
    TemplateContent {
        hero: HeroContent {
            title: content.hero.title,
            subtitle: or_default(content.hero.subtitle, &fallback.hero.subtitle),
            cta_label: or_default(content.hero.cta_label, &fallback.hero.cta_label),
        },
        services,
        about: AboutContent {
            title: or_default(content.about.title, &fallback.about.title),
            body: or_default(content.about.body, &fallback.about.body),
        },
        contact: ContactContent {
            headline: or_default(content.contact.headline, &fallback.contact.headline),
            email: or_default(content.contact.email, &fallback.contact.email),
            phone: or_default(content.contact.phone, &fallback.contact.phone),
        },
        faq,
        footer: FooterContent {
            text: or_default(content.footer.text, &fallback.footer.text),
        },
    }
}

fn build_content_prompt(request: &str, brand: &BrandContext) -> String {
    format!(
        "Write website copy for {name} ({tagline}), a {category} brand for {audience}.\n\
         Request: {request}\nKeywords: {keywords}\nPain points: {pains}\n\
         Return ONLY one JSON object with keys: hero {{title, subtitle, ctaLabel}}, \
         services (exactly 3 x {{title, description}}), about {{title, body}}, \
         contact {{headline, email, phone}}, faq (exactly 3 x {{question, answer}}), footer {{text}}.",
        name = brand.name,
        tagline = brand.tagline,
        category = brand.category_or_default(),
        audience = brand.audience_or_default(),
        request = request,
        keywords = brand.insights.keywords.join(", "),
        pains = brand.insights.pain_points.join("; "),
    )
}

/// 由品牌上下文派生的完整静态文案
pub fn static_content(brand: &BrandContext) -> TemplateContent {
    let name = brand.name.trim();
    let category = brand.category_or_default();
    let audience = brand.audience_or_default();
    let subtitle = if brand.tagline.trim().is_empty() {
        format!("{} for {}", category, audience)
    } else {
        brand.tagline.trim().to_string()
    };
    let slug: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let domain = if slug.is_empty() { "example".to_string() } else { slug };

    let pain = brand
        .insights
        .pain_points
        .first()
        .cloned()
        .unwrap_or_else(|| "wasted time".to_string());
    let opportunity = brand
        .insights
        .opportunities
        .first()
        .cloned()
        .unwrap_or_else(|| "a better experience".to_string());

    TemplateContent {
        hero: HeroContent {
            title: format!("Welcome to {}", name),
            subtitle,
            cta_label: "Get started".to_string(),
        },
        services: vec![
            ServiceItem {
                title: format!("{} essentials", category),
                description: format!("Everything {} need to get going, without {}.", audience, pain),
            },
            ServiceItem {
                title: "Personal guidance".to_string(),
                description: format!("Talk to the {} team and get a plan tailored to you.", name),
            },
            ServiceItem {
                title: "Ongoing support".to_string(),
                description: format!("We keep improving so you can count on {}.", opportunity),
            },
        ],
        about: AboutContent {
            title: format!("About {}", name),
            body: format!(
                "{} was built for {} who want {}. We focus on quality, honesty and results.",
                name, audience, opportunity
            ),
        },
        contact: ContactContent {
            headline: "Let's talk".to_string(),
            email: format!("hello@{}.com", domain),
            phone: "+1 (555) 010-0000".to_string(),
        },
        faq: vec![
            FaqItem {
                question: format!("What does {} offer?", name),
                answer: format!("{} services designed for {}.", category, audience),
            },
            FaqItem {
                question: "How do I get started?".to_string(),
                answer: "Use the contact form or email us and we will reply within one business day.".to_string(),
            },
            FaqItem {
                question: "Can I cancel anytime?".to_string(),
                answer: "Yes. There are no long-term commitments.".to_string(),
            },
        ],
        footer: FooterContent {
            text: format!("© {}. All rights reserved.", name),
        },
    }
}

fn render_stylesheet(brand: &BrandContext) -> String {
    format!(
        "@import url('https://fonts.googleapis.com/css2?family=Inter:wght@400;600&family=Playfair+Display:wght@600;700&display=swap');\n\n\
         {vars}\n\
         :root {{\n  --font-body: '{body}', system-ui, sans-serif;\n  --font-heading: '{heading}', Georgia, serif;\n}}\n\n\
         * {{ box-sizing: border-box; }}\n\
         body {{ margin: 0; font-family: var(--font-body); background: var(--color-background); color: var(--color-text); }}\n\
         h1, h2, h3 {{ font-family: var(--font-heading); }}\n\
         section {{ padding: 4rem 1.5rem; max-width: 72rem; margin: 0 auto; }}\n\
         .hero {{ text-align: center; }}\n\
         .hero h1 {{ color: var(--color-primary); font-size: 3rem; }}\n\
         .button {{ display: inline-block; padding: 0.75rem 1.5rem; border-radius: 0.5rem; background: var(--color-primary); color: var(--color-background); text-decoration: none; }}\n\
         .grid {{ display: grid; gap: 1.5rem; grid-template-columns: repeat(auto-fit, minmax(16rem, 1fr)); }}\n\
         .card {{ padding: 1.5rem; border-radius: 0.75rem; border: 1px solid var(--color-secondary); }}\n\
         .accent {{ color: var(--color-accent); }}\n\
         footer {{ padding: 2rem; text-align: center; background: var(--color-secondary); color: var(--color-background); }}\n",
        vars = css_variables_block(brand),
        body = TEMPLATE_FONTS[0],
        heading = TEMPLATE_FONTS[1],
    )
}

fn render_root(variant: TemplateVariant) -> String {
    let order = variant.section_order();
    let mut imports = String::new();
    let mut body = String::new();
    for name in order.iter().chain(std::iter::once(&"Footer")) {
        imports.push_str(&format!("import {name} from './components/{name}';\n", name = name));
    }
    for name in order {
        body.push_str(&format!("        <{} />\n", name));
    }
    format!(
        "{imports}\nexport default function App() {{\n  return (\n    <>\n      <main>\n{body}      </main>\n      <Footer />\n    </>\n  );\n}}\n",
        imports = imports,
        body = body,
    )
}

const ENTRY_SOURCE: &str = r##"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App';
import './index.css';

ReactDOM.createRoot(document.getElementById('root')!).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"##;

const HERO_SOURCE: &str = r##"import { content } from '../content';

export default function Hero() {
  return (
    <section className="hero" id="home">
      <h1>{content.hero.title}</h1>
      <p>{content.hero.subtitle}</p>
      <a className="button" href="#contact">{content.hero.ctaLabel}</a>
    </section>
  );
}
"##;

const SERVICES_SOURCE: &str = r##"import { content } from '../content';

export default function Services() {
  return (
    <section id="services">
      <h2>Services</h2>
      <div className="grid">
        {content.services.map((service) => (
          <article className="card" key={service.title}>
            <h3 className="accent">{service.title}</h3>
            <p>{service.description}</p>
          </article>
        ))}
      </div>
    </section>
  );
}
"##;

const ABOUT_SOURCE: &str = r##"import { content } from '../content';

export default function About() {
  return (
    <section id="about">
      <h2>{content.about.title}</h2>
      <p>{content.about.body}</p>
    </section>
  );
}
"##;

const CONTACT_SOURCE: &str = r##"import { content } from '../content';

export default function Contact() {
  return (
    <section id="contact">
      <h2>{content.contact.headline}</h2>
      <p><a href={`mailto:${content.contact.email}`}>{content.contact.email}</a></p>
      <p>{content.contact.phone}</p>
    </section>
  );
}
"##;

const FAQ_SOURCE: &str = r##"import { content } from '../content';

export default function Faq() {
  return (
    <section id="faq">
      <h2>Frequently asked questions</h2>
      {content.faq.map((item) => (
        <details className="card" key={item.question}>
          <summary>{item.question}</summary>
          <p>{item.answer}</p>
        </details>
      ))}
    </section>
  );
}
"##;

const FOOTER_SOURCE: &str = r##"import { content } from '../content';

export default function Footer() {
  return (
    <footer>
      <p>{content.footer.text}</p>
    </footer>
  );
}
"##;

/// 确定性输出固定文件拓扑
pub fn render_files(brand: &BrandContext, content: &TemplateContent, variant: TemplateVariant) -> FileSet {
    let json = serde_json::to_string_pretty(content).unwrap_or_else(|_| "{}".to_string());
    let mut files = FileSet::new();
    files.insert(ENTRY_FILE, ENTRY_SOURCE);
    files.insert(ROOT_FILE, render_root(variant));
    files.insert("src/components/Hero.tsx", HERO_SOURCE);
    files.insert("src/components/Services.tsx", SERVICES_SOURCE);
    files.insert("src/components/About.tsx", ABOUT_SOURCE);
    files.insert("src/components/Contact.tsx", CONTACT_SOURCE);
    files.insert("src/components/Faq.tsx", FAQ_SOURCE);
    files.insert("src/components/Footer.tsx", FOOTER_SOURCE);
    files.insert(CONTENT_FILE, format!("export const content = {} as const;\n", json));
    files.insert(STYLESHEET_FILE, render_stylesheet(brand));
    files
}
